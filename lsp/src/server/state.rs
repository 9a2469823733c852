use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use ropey::Rope;
use tower_lsp::lsp_types::{CompletionItem, CompletionItemKind, Url};
use tower_lsp::Client;

use crate::analyzer::{Analysis, AnalyzerSettings, ApiDefs};

use super::config::ServerConfig;

/// In-memory representation of an open document and its cached analysis.
#[derive(Default)]
pub(crate) struct Document {
    pub(crate) content: Rope,
    pub(crate) version: i32,
    /// Most recent committed snapshot; a failed parse keeps the old one.
    pub(crate) analysis: Option<Arc<Analysis>>,
    pub(crate) debounce_seq: u64,
}

/// Primary LSP server state shared across handlers.
pub(crate) struct LoupeLanguageServer {
    pub(crate) client: Client,
    pub(crate) documents: Arc<DashMap<Url, Document>>,
    pub(crate) defs: Mutex<Arc<ApiDefs>>,
    pub(crate) config: Mutex<ServerConfig>,
}

impl LoupeLanguageServer {
    pub(crate) fn new(client: Client) -> Self {
        let config = ServerConfig::default();
        Self {
            client,
            documents: Arc::new(DashMap::new()),
            defs: Mutex::new(Arc::new(ApiDefs::load(&config.default_api_version))),
            config: Mutex::new(config),
        }
    }

    pub(crate) fn current_defs(&self) -> Arc<ApiDefs> {
        self.defs.lock().expect("defs lock").clone()
    }

    pub(crate) fn analyzer_settings(&self) -> AnalyzerSettings {
        let config = self.config.lock().expect("config lock");
        AnalyzerSettings {
            pre_defined_globals: config.pre_defined_globals.clone(),
            ignore_p8scii: config.ignore_p8scii,
        }
    }

    pub(crate) fn keyword_completions(&self) -> Vec<CompletionItem> {
        let keywords = [
            "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto",
            "if", "in", "local", "nil", "not", "or", "repeat", "return", "then", "true", "until",
            "while",
        ];
        keywords
            .iter()
            .map(|keyword| CompletionItem {
                label: keyword.to_string(),
                kind: Some(CompletionItemKind::KEYWORD),
                detail: Some("keyword".to_string()),
                ..Default::default()
            })
            .collect()
    }
}
