use assets::{
    accept_source, cache_busted, decode_rgba, texture_paths, FetchError, ShaderSources,
    TextureError, TextureSet,
};
use js_sys::{Promise, Uint8Array};
use simconfig::AssetSettings;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{Response, Window};

use crate::urls::asset_url;

/// Loads shader text and texture images over `fetch`.
///
/// Every request of a batch is issued before the first one is awaited, so
/// the browser runs them concurrently and the batch settles as a whole.
pub struct WebAssetSource {
    window: Window,
    settings: AssetSettings,
}

impl WebAssetSource {
    pub fn new(window: Window, settings: AssetSettings) -> Self {
        Self { window, settings }
    }

    pub async fn load_shaders(&self) -> ShaderSources {
        let token = js_sys::Date::now() as u128;
        let pending = ShaderSources::FILES.map(|file| {
            let path = self.settings.shader_path(file);
            let url = cache_busted(&asset_url(&self.settings.base, &path), token);
            let request = self.window.fetch_with_str(&url);
            (path, request)
        });

        let mut texts: [String; 6] = Default::default();
        for (slot, (path, request)) in texts.iter_mut().zip(pending) {
            let fetched = fetch_text(&path, request).await;
            *slot = accept_source(&path, fetched);
        }
        ShaderSources::from_ordered(texts)
    }

    pub async fn load_textures(&self, seed: u64) -> TextureSet {
        let pending: Vec<(String, Promise)> = texture_paths(&self.settings)
            .into_iter()
            .map(|path| {
                let request = self
                    .window
                    .fetch_with_str(&asset_url(&self.settings.base, &path));
                (path, request)
            })
            .collect();

        let mut results: Vec<Result<_, TextureError>> = Vec::with_capacity(pending.len());
        for (path, request) in pending {
            let decoded = match fetch_bytes(&path, request).await {
                Ok(bytes) => decode_rgba(&path, &bytes),
                Err(err) => Err(err.into()),
            };
            results.push(decoded);
        }
        let gradient = results.pop().unwrap_or_else(|| {
            Err(FetchError::Host("colour map was never requested".to_string()).into())
        });
        TextureSet::assemble(results, gradient, seed)
    }
}

async fn fetch_text(path: &str, request: Promise) -> Result<String, FetchError> {
    let response = settle(path, request).await?;
    let body = response.text().map_err(|err| host_error(path, &err))?;
    let text = JsFuture::from(body)
        .await
        .map_err(|err| host_error(path, &err))?;
    text.as_string()
        .ok_or_else(|| FetchError::NotUtf8(path.to_string()))
}

async fn fetch_bytes(path: &str, request: Promise) -> Result<Vec<u8>, FetchError> {
    let response = settle(path, request).await?;
    let body = response
        .array_buffer()
        .map_err(|err| host_error(path, &err))?;
    let buffer = JsFuture::from(body)
        .await
        .map_err(|err| host_error(path, &err))?;
    Ok(Uint8Array::new(&buffer).to_vec())
}

async fn settle(path: &str, request: Promise) -> Result<Response, FetchError> {
    let value = JsFuture::from(request)
        .await
        .map_err(|err| host_error(path, &err))?;
    let response: Response = value
        .dyn_into()
        .map_err(|_| FetchError::Host(format!("{path}: fetch did not yield a Response")))?;
    if !response.ok() {
        return Err(FetchError::Status {
            url: path.to_string(),
            status: response.status(),
        });
    }
    Ok(response)
}

fn host_error(path: &str, err: &JsValue) -> FetchError {
    let detail = err.as_string().unwrap_or_else(|| format!("{err:?}"));
    FetchError::Host(format!("{path}: {detail}"))
}
