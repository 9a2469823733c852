use std::sync::Arc;

use serde::Deserialize;
use tower_lsp::lsp_types::ConfigurationItem;

use crate::analyzer::ApiDefs;

use super::state::LoupeLanguageServer;

/// How much work the user wants from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DontBother {
    /// Full service.
    No,
    /// Disable every analysis-backed feature.
    All,
    /// Keep analysis-backed queries, suppress published diagnostics.
    NoDiagnostics,
    /// Only basic editor support; no analysis features or diagnostics.
    OnlyColoration,
}

#[derive(Debug, Clone)]
pub(crate) struct ServerConfig {
    pub(crate) dont_bother: DontBother,
    pub(crate) default_api_version: String,
    pub(crate) pre_defined_globals: Vec<String>,
    pub(crate) ignore_p8scii: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            dont_bother: DontBother::No,
            default_api_version: "0.2".to_string(),
            pre_defined_globals: Vec::new(),
            ignore_p8scii: false,
        }
    }
}

impl ServerConfig {
    pub(crate) fn analysis_enabled(&self) -> bool {
        matches!(self.dont_bother, DontBother::No | DontBother::NoDiagnostics)
    }

    pub(crate) fn diagnostics_enabled(&self) -> bool {
        self.dont_bother == DontBother::No
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LoupeLspConfigSection {
    #[serde(default)]
    dont_bother: Option<String>,
    #[serde(default)]
    default_api_version: Option<String>,
    #[serde(default)]
    pre_defined_globals: Option<Vec<String>>,
    #[serde(default)]
    ignore_p8scii: Option<bool>,
}

fn parse_dont_bother(value: &str) -> DontBother {
    match value {
        "all" => DontBother::All,
        "no diagnostics" => DontBother::NoDiagnostics,
        "only coloration" => DontBother::OnlyColoration,
        _ => DontBother::No,
    }
}

impl LoupeLanguageServer {
    pub(crate) async fn load_config(&self) {
        let items = vec![ConfigurationItem {
            scope_uri: None,
            section: Some("loupe.lsp".to_string()),
        }];

        if let Ok(values) = self.client.configuration(items).await {
            if let Some(val) = values.into_iter().next() {
                if let Ok(section) = serde_json::from_value::<LoupeLspConfigSection>(val) {
                    let reload_version = {
                        let mut guard = self.config.lock().expect("config lock");
                        if let Some(v) = section.dont_bother {
                            guard.dont_bother = parse_dont_bother(&v);
                        }
                        if let Some(v) = section.pre_defined_globals {
                            guard.pre_defined_globals = v;
                        }
                        if let Some(v) = section.ignore_p8scii {
                            guard.ignore_p8scii = v;
                        }
                        match section.default_api_version {
                            Some(v) if v != guard.default_api_version => {
                                guard.default_api_version = v.clone();
                                Some(v)
                            }
                            _ => None,
                        }
                    };
                    if let Some(version) = reload_version {
                        let defs = Arc::new(ApiDefs::load(&version));
                        *self.defs.lock().expect("defs lock") = defs;
                    }
                }
            }
        }
    }
}
