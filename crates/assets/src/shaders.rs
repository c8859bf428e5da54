use simconfig::AssetSettings;
use tracing::{info, warn};

use crate::fetch::{AssetFetcher, FetchError};

pub const VERTEX_SHADER: &str = "simple.vert";
pub const SCENE_SHADER: &str = "blackhole_main.frag";
pub const BRIGHTNESS_SHADER: &str = "bloom_brightness_pass.frag";
pub const BLOOM_COMPOSITE_SHADER: &str = "bloom_composite.frag";
pub const TONEMAPPING_SHADER: &str = "tonemapping.frag";
pub const PASSTHROUGH_SHADER: &str = "passthrough.frag";

/// Pass-through vertex stage: clip-space position in, `(xy + 1) / 2` UV out.
pub const FALLBACK_VERTEX: &str = r#"#version 300 es
precision highp float;
in vec3 position;
out vec2 uv;
void main() {
    uv = (position.xy + 1.0) * 0.5;
    gl_Position = vec4(position, 1.0);
}
"#;

/// Minimal black disk with an accretion ring over the galaxy cubemap.
pub const FALLBACK_SCENE: &str = r#"#version 300 es
precision highp float;
in vec2 uv;
out vec4 fragColor;
uniform float time;
uniform vec2 resolution;
uniform samplerCube galaxy;
uniform sampler2D colorMap;

void main() {
    vec2 center = vec2(0.5, 0.5);
    float dist = distance(uv, center);

    float blackHole = smoothstep(0.05, 0.15, dist);
    float accretionDisk = smoothstep(0.15, 0.4, dist) * (1.0 - smoothstep(0.4, 0.6, dist));

    vec3 diskColor = vec3(1.0, 0.5, 0.1) * accretionDisk;
    vec3 spaceColor = texture(galaxy, vec3(uv - 0.5, 0.5)).rgb * blackHole;

    vec3 finalColor = diskColor + spaceColor * 0.5;
    fragColor = vec4(finalColor, 1.0);
}
"#;

pub const FALLBACK_GENERIC: &str = r#"#version 300 es
precision highp float;
in vec2 uv;
out vec4 fragColor;
uniform float time;
void main() {
    vec2 center = vec2(0.5, 0.5);
    float dist = distance(uv, center);
    float blackHole = smoothstep(0.1, 0.2, dist);
    vec3 color = mix(vec3(0.0), vec3(1.0, 0.5, 0.0), blackHole);
    fragColor = vec4(color, 1.0);
}
"#;

/// Which built-in source stands in for a shader that could not be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    Vertex,
    Scene,
    Generic,
}

impl FallbackKind {
    pub fn for_path(path: &str) -> Self {
        if path.contains(VERTEX_SHADER) {
            FallbackKind::Vertex
        } else if path.contains(SCENE_SHADER) {
            FallbackKind::Scene
        } else {
            FallbackKind::Generic
        }
    }

    pub fn source(self) -> &'static str {
        match self {
            FallbackKind::Vertex => FALLBACK_VERTEX,
            FallbackKind::Scene => FALLBACK_SCENE,
            FallbackKind::Generic => FALLBACK_GENERIC,
        }
    }
}

/// Turns a fetch outcome into usable shader text, substituting a fallback on
/// failure or whitespace-only bodies. Never fails.
pub fn accept_source(path: &str, fetched: Result<String, FetchError>) -> String {
    let error = match fetched {
        Ok(text) if !text.trim().is_empty() => {
            info!(%path, "loaded shader");
            return text;
        }
        Ok(_) => FetchError::Empty(path.to_string()),
        Err(err) => err,
    };
    let kind = FallbackKind::for_path(path);
    warn!(%path, error = %error, fallback = ?kind, "using built-in shader source");
    kind.source().to_string()
}

/// Fetches shader text relative to the configured shader prefix.
pub struct ShaderLoader<'a> {
    fetcher: &'a dyn AssetFetcher,
    settings: &'a AssetSettings,
}

impl<'a> ShaderLoader<'a> {
    pub fn new(fetcher: &'a dyn AssetFetcher, settings: &'a AssetSettings) -> Self {
        Self { fetcher, settings }
    }

    pub fn load(&self, file: &str) -> String {
        let path = self.settings.shader_path(file);
        let fetched = self.fetcher.fetch_text(&path);
        accept_source(&path, fetched)
    }

    pub fn load_all(&self) -> ShaderSources {
        ShaderSources {
            vertex: self.load(VERTEX_SHADER),
            scene: self.load(SCENE_SHADER),
            brightness: self.load(BRIGHTNESS_SHADER),
            bloom_composite: self.load(BLOOM_COMPOSITE_SHADER),
            tonemapping: self.load(TONEMAPPING_SHADER),
            passthrough: self.load(PASSTHROUGH_SHADER),
        }
    }
}

/// Source text for every stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSources {
    pub vertex: String,
    pub scene: String,
    pub brightness: String,
    pub bloom_composite: String,
    pub tonemapping: String,
    pub passthrough: String,
}

impl ShaderSources {
    /// The sources used when nothing could be fetched at all.
    pub fn fallback() -> Self {
        Self {
            vertex: FALLBACK_VERTEX.to_string(),
            scene: FALLBACK_SCENE.to_string(),
            brightness: FALLBACK_GENERIC.to_string(),
            bloom_composite: FALLBACK_GENERIC.to_string(),
            tonemapping: FALLBACK_GENERIC.to_string(),
            passthrough: FALLBACK_GENERIC.to_string(),
        }
    }

    /// File names in load order, paired with the stage they feed.
    pub const FILES: [&'static str; 6] = [
        VERTEX_SHADER,
        SCENE_SHADER,
        BRIGHTNESS_SHADER,
        BLOOM_COMPOSITE_SHADER,
        TONEMAPPING_SHADER,
        PASSTHROUGH_SHADER,
    ];

    /// Builds the set from texts in [`ShaderSources::FILES`] order.
    pub fn from_ordered(texts: [String; 6]) -> Self {
        let [vertex, scene, brightness, bloom_composite, tonemapping, passthrough] = texts;
        Self {
            vertex,
            scene,
            brightness,
            bloom_composite,
            tonemapping,
            passthrough,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::DirectoryFetcher;

    #[test]
    fn fallback_selection_matches_stage() {
        assert_eq!(
            FallbackKind::for_path("shader/simple.vert"),
            FallbackKind::Vertex
        );
        assert_eq!(
            FallbackKind::for_path("/blackhole/shader/blackhole_main.frag"),
            FallbackKind::Scene
        );
        assert_eq!(
            FallbackKind::for_path("shader/tonemapping.frag"),
            FallbackKind::Generic
        );
    }

    #[test]
    fn blank_body_uses_fallback() {
        let text = accept_source("shader/simple.vert", Ok("  \n\t ".into()));
        assert_eq!(text, FALLBACK_VERTEX);
    }

    #[test]
    fn error_uses_fallback() {
        let text = accept_source(
            "shader/blackhole_main.frag",
            Err(FetchError::Status {
                url: "x".into(),
                status: 404,
            }),
        );
        assert_eq!(text, FALLBACK_SCENE);
    }

    #[test]
    fn fetched_text_is_returned_verbatim() {
        let text = accept_source("shader/passthrough.frag", Ok("void main() {}\n".into()));
        assert_eq!(text, "void main() {}\n");
    }

    #[test]
    fn loader_mixes_fetched_and_fallback_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("shader")).unwrap();
        std::fs::write(dir.path().join("shader/tonemapping.frag"), "// tonemap\n").unwrap();

        let fetcher = DirectoryFetcher::new(dir.path());
        let settings = AssetSettings::default();
        let sources = ShaderLoader::new(&fetcher, &settings).load_all();

        assert_eq!(sources.tonemapping, "// tonemap\n");
        assert_eq!(sources.vertex, FALLBACK_VERTEX);
        assert_eq!(sources.scene, FALLBACK_SCENE);
        assert_eq!(sources.passthrough, FALLBACK_GENERIC);
    }

    #[test]
    fn fallback_sources_declare_expected_interfaces() {
        assert!(FALLBACK_VERTEX.contains("in vec3 position"));
        assert!(FALLBACK_VERTEX.contains("out vec2 uv"));
        for name in ["galaxy", "colorMap", "resolution", "time"] {
            assert!(FALLBACK_SCENE.contains(name), "scene fallback lacks {name}");
        }
    }
}
