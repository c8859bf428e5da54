mod cli;
mod paths;
mod run;
mod window;

use anyhow::Result;
use cli::{Command, ParamsArgs, RunArgs};

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::Params(params)) => print_params(&cli.run, &params),
        None => run::run(cli.run),
    }
}

fn print_params(run_args: &RunArgs, params: &ParamsArgs) -> Result<()> {
    let config = run::resolve_config(run_args)?;
    print!("{}", run::render_params(&config.parameters, params.json)?);
    if params.json {
        println!();
    }
    Ok(())
}
