use serde::Deserialize;

/// Engine limits.
///
/// Can be built in code or loaded from JSON:
///
/// ```ignore
/// let config = EngineConfig::from_json(r#"{ "heap_max_mb": 128, "default_timeout": 2.5 }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial heap size in MB (only used together with `heap_max_mb`)
    pub heap_initial_mb: usize,

    /// Maximum heap size in MB (`None` = V8 default)
    pub heap_max_mb: Option<usize>,

    /// Default evaluation timeout in seconds for new contexts (<= 0 = unbounded)
    pub default_timeout: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heap_initial_mb: 0,
            heap_max_mb: None,
            default_timeout: 0.0,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// V8 create params for these limits.
    pub(crate) fn create_params(&self) -> v8::CreateParams {
        let params = v8::CreateParams::default();

        match self.heap_max_mb {
            Some(max) => {
                let initial = self.heap_initial_mb.min(max);
                params.heap_limits(initial * 1024 * 1024, max * 1024 * 1024)
            }
            None => params,
        }
    }
}
