use ropey::Rope;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::LanguageServer;
use tracing::info;

use crate::analyzer::ty::{self, Ty, MAX_TYPE_DEPTH};

use super::state::{Document, LoupeLanguageServer};
use super::text::{
    apply_content_change, callee_column, ident_start_column, line_prefix, member_base_column,
};

#[tower_lsp::async_trait]
impl LanguageServer for LoupeLanguageServer {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        info!("initializing, root: {:?}", params.root_uri);

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                completion_provider: Some(CompletionOptions {
                    resolve_provider: Some(true),
                    trigger_characters: Some(vec![".".to_string(), ":".to_string()]),
                    work_done_progress_options: Default::default(),
                    all_commit_characters: None,
                    completion_item: None,
                }),
                signature_help_provider: Some(SignatureHelpOptions {
                    trigger_characters: Some(vec!["(".to_string()]),
                    retrigger_characters: None,
                    work_done_progress_options: Default::default(),
                }),
                document_symbol_provider: Some(OneOf::Left(true)),
                document_highlight_provider: Some(OneOf::Left(true)),
                document_link_provider: Some(DocumentLinkOptions {
                    resolve_provider: Some(false),
                    work_done_progress_options: Default::default(),
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "Loupe Language Server".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        info!("initialized");
        let _ = self
            .client
            .log_message(MessageType::INFO, "loupe language server started")
            .await;
        self.load_config().await;
    }

    async fn shutdown(&self) -> Result<()> {
        info!("shutting down");
        Ok(())
    }

    async fn did_change_configuration(&self, _params: DidChangeConfigurationParams) {
        self.load_config().await;
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;
        let document = Document {
            content: Rope::from_str(&params.text_document.text),
            version,
            analysis: None,
            debounce_seq: 0,
        };
        self.documents.insert(uri.clone(), document);
        // Defer analysis on open so the editor stays responsive.
        self.schedule_diagnostics(uri, version, 150);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        {
            let mut entry = self.documents.entry(uri.clone()).or_default();
            entry.version = version;
            for change in &params.content_changes {
                apply_content_change(&mut entry.content, change);
            }
            entry.analysis = None;
            entry.debounce_seq = entry.debounce_seq.wrapping_add(1);
        }

        self.schedule_diagnostics(uri, version, 250);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.documents.remove(&uri);
        let _ = self.client.publish_diagnostics(uri, Vec::new(), None).await;
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(analysis) = self.get_or_compute_analysis(&uri).await else {
            return Ok(None);
        };
        let prefix = match self.documents.get(&uri) {
            Some(doc) => line_prefix(&doc.content, position),
            None => return Ok(None),
        };
        let column = ident_start_column(&prefix);
        let Some(markdown) = analysis.hover(position.line + 1, column) else {
            return Ok(None);
        };
        Ok(Some(Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: markdown,
            }),
            range: None,
        }))
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let Some(analysis) = self.get_or_compute_analysis(&uri).await else {
            return Ok(None);
        };
        let (prefix, offset) = match self.documents.get(&uri) {
            Some(doc) => (
                line_prefix(&doc.content, position),
                super::text::position_to_char_idx(&doc.content, position),
            ),
            None => return Ok(None),
        };

        if let Some(column) = member_base_column(&prefix) {
            let members = analysis
                .member_completions(position.line + 1, column)
                .unwrap_or_default();
            let items: Vec<CompletionItem> = members
                .into_iter()
                .map(|(name, ty)| CompletionItem {
                    label: name,
                    kind: Some(completion_kind(ty)),
                    detail: Some(ty::render(&analysis.pool, ty, MAX_TYPE_DEPTH)),
                    ..Default::default()
                })
                .collect();
            return Ok(Some(CompletionResponse::Array(items)));
        }

        let mut items: Vec<CompletionItem> = analysis
            .visible_completions(offset)
            .into_iter()
            .map(|(name, ty, doc)| CompletionItem {
                label: name,
                kind: Some(completion_kind(ty)),
                detail: Some(ty::render(&analysis.pool, ty, MAX_TYPE_DEPTH)),
                documentation: doc.map(Documentation::String),
                ..Default::default()
            })
            .collect();
        items.extend(self.keyword_completions());
        Ok(Some(CompletionResponse::Array(items)))
    }

    async fn completion_resolve(&self, mut item: CompletionItem) -> Result<CompletionItem> {
        if item.documentation.is_none() {
            let defs = self.current_defs();
            if let Some(def) = defs.find(&item.label) {
                if item.detail.is_none() {
                    item.detail = Some(def.ty.clone());
                }
                if !def.doc.is_empty() {
                    item.documentation = Some(Documentation::String(def.doc.clone()));
                }
            }
        }
        Ok(item)
    }

    async fn signature_help(&self, params: SignatureHelpParams) -> Result<Option<SignatureHelp>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(analysis) = self.get_or_compute_analysis(&uri).await else {
            return Ok(None);
        };
        let prefix = match self.documents.get(&uri) {
            Some(doc) => line_prefix(&doc.content, position),
            None => return Ok(None),
        };
        let Some(column) = callee_column(&prefix) else {
            return Ok(None);
        };
        Ok(analysis.signature_help(position.line + 1, column))
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>> {
        let uri = params.text_document.uri;
        let Some(analysis) = self.get_or_compute_analysis(&uri).await else {
            return Ok(None);
        };
        Ok(Some(DocumentSymbolResponse::Nested(
            analysis.symbols.clone(),
        )))
    }

    async fn document_highlight(
        &self,
        params: DocumentHighlightParams,
    ) -> Result<Option<Vec<DocumentHighlight>>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(analysis) = self.get_or_compute_analysis(&uri).await else {
            return Ok(None);
        };
        let prefix = match self.documents.get(&uri) {
            Some(doc) => line_prefix(&doc.content, position),
            None => return Ok(None),
        };
        let column = ident_start_column(&prefix);
        Ok(analysis.highlights(position.line + 1, column))
    }

    async fn document_link(&self, params: DocumentLinkParams) -> Result<Option<Vec<DocumentLink>>> {
        let uri = params.text_document.uri;
        let Some(analysis) = self.get_or_compute_analysis(&uri).await else {
            return Ok(None);
        };
        Ok(Some(analysis.links.clone()))
    }
}

fn completion_kind(ty: Ty) -> CompletionItemKind {
    match ty {
        Ty::Function(_) => CompletionItemKind::FUNCTION,
        Ty::Table(_) => CompletionItemKind::MODULE,
        _ => CompletionItemKind::VARIABLE,
    }
}
