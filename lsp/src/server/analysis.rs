use std::path::PathBuf;
use std::sync::Arc;

use tokio::task;
use tokio::time::{sleep, Duration};
use tower_lsp::lsp_types::{notification, Diagnostic, PublishDiagnosticsParams, Url};

use crate::analyzer::{Analysis, DocumentSession};

use super::state::LoupeLanguageServer;

fn base_dir_of(uri: &Url) -> Option<PathBuf> {
    uri.to_file_path()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
}

impl LoupeLanguageServer {
    /// Debounced re-analysis. Runs after `delay_ms`; bails out if the
    /// document changed again in the meantime.
    pub(crate) fn schedule_diagnostics(&self, uri: Url, scheduled_version: i32, delay_ms: u64) {
        let documents = self.documents.clone();
        let client = self.client.clone();
        let defs = self.current_defs();
        let settings = self.analyzer_settings();
        let (analysis_enabled, diagnostics_enabled) = {
            let config = self.config.lock().expect("config lock");
            (config.analysis_enabled(), config.diagnostics_enabled())
        };
        if !analysis_enabled && !diagnostics_enabled {
            return;
        }

        tokio::spawn(async move {
            sleep(Duration::from_millis(delay_ms)).await;

            let (content_snapshot, seq_snapshot, version_snapshot) =
                if let Some(doc) = documents.get(&uri) {
                    (doc.content.to_string(), doc.debounce_seq, doc.version)
                } else {
                    return;
                };

            if version_snapshot != scheduled_version {
                return;
            }

            let base_dir = base_dir_of(&uri);
            let computed = task::spawn_blocking(move || {
                let mut session = DocumentSession::new(defs, settings);
                let diagnostics = session.update(&content_snapshot, base_dir.as_deref());
                (diagnostics, session.snapshot())
            })
            .await
            .ok();

            let mut diagnostics_to_publish: Option<Vec<Diagnostic>> = None;
            if let Some((diagnostics, snapshot)) = computed {
                diagnostics_to_publish = Some(diagnostics);
                if let Some(analysis) = snapshot {
                    if let Some(mut doc) = documents.get_mut(&uri) {
                        if doc.debounce_seq == seq_snapshot && doc.version == version_snapshot {
                            doc.analysis = Some(analysis);
                        }
                    }
                }
            }

            if !diagnostics_enabled {
                return;
            }
            if let Some(diagnostics) = diagnostics_to_publish {
                let _ = client
                    .send_notification::<notification::PublishDiagnostics>(
                        PublishDiagnosticsParams {
                            uri: uri.clone(),
                            version: Some(version_snapshot),
                            diagnostics,
                        },
                    )
                    .await;
            }
        });
    }

    /// Cached snapshot for the document, computing one on demand when no
    /// debounced run has committed yet.
    pub(crate) async fn get_or_compute_analysis(&self, uri: &Url) -> Option<Arc<Analysis>> {
        {
            let config = self.config.lock().expect("config lock");
            if !config.analysis_enabled() {
                return None;
            }
        }
        if let Some(doc) = self.documents.get(uri) {
            if let Some(cached) = doc.analysis.clone() {
                return Some(cached);
            }
        }

        let (content_snapshot, version_snapshot, seq_snapshot) = {
            let doc = self.documents.get(uri)?;
            (doc.content.to_string(), doc.version, doc.debounce_seq)
        };

        let defs = self.current_defs();
        let settings = self.analyzer_settings();
        let base_dir = base_dir_of(uri);
        let computed = task::spawn_blocking(move || {
            let mut session = DocumentSession::new(defs, settings);
            session.update(&content_snapshot, base_dir.as_deref());
            session.snapshot()
        })
        .await
        .ok()??;

        if let Some(mut doc) = self.documents.get_mut(uri) {
            if doc.version == version_snapshot && doc.debounce_seq == seq_snapshot {
                doc.analysis = Some(computed.clone());
            }
        }
        Some(computed)
    }
}
