//! Client capabilities for the `ivy_lsp` handshake and validation of the
//! capability set the server reports back.

use lsp_types::{
	ClientCapabilities, CompletionClientCapabilities, CompletionItemCapability,
	DocumentSymbolClientCapabilities, DynamicRegistrationClientCapabilities, GotoCapability,
	HoverClientCapabilities, MarkupKind, ServerCapabilities, SymbolKind, SymbolKindCapability,
	TextDocumentClientCapabilities, TextDocumentSyncClientCapabilities,
	WorkspaceClientCapabilities, WorkspaceSymbolClientCapabilities,
};
use tracing::{info, warn};

use crate::{Error, Result};

/// Build the client capabilities declared in the initialize request.
pub fn client_capabilities() -> ClientCapabilities {
	ClientCapabilities {
		text_document: Some(TextDocumentClientCapabilities {
			synchronization: Some(TextDocumentSyncClientCapabilities {
				dynamic_registration: Some(true),
				did_save: Some(true),
				..Default::default()
			}),
			completion: Some(CompletionClientCapabilities {
				dynamic_registration: Some(true),
				completion_item: Some(CompletionItemCapability {
					snippet_support: Some(true),
					..Default::default()
				}),
				..Default::default()
			}),
			definition: Some(GotoCapability {
				dynamic_registration: Some(true),
				link_support: None,
			}),
			references: Some(DynamicRegistrationClientCapabilities {
				dynamic_registration: Some(true),
			}),
			document_symbol: Some(DocumentSymbolClientCapabilities {
				dynamic_registration: Some(true),
				hierarchical_document_symbol_support: Some(true),
				symbol_kind: Some(SymbolKindCapability {
					value_set: Some(all_symbol_kinds()),
				}),
				..Default::default()
			}),
			hover: Some(HoverClientCapabilities {
				dynamic_registration: Some(true),
				content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
			}),
			..Default::default()
		}),
		workspace: Some(WorkspaceClientCapabilities {
			workspace_folders: Some(true),
			did_change_configuration: Some(DynamicRegistrationClientCapabilities {
				dynamic_registration: Some(true),
			}),
			symbol: Some(WorkspaceSymbolClientCapabilities {
				dynamic_registration: Some(true),
				..Default::default()
			}),
			..Default::default()
		}),
		..Default::default()
	}
}

/// Validate the capability set from the initialize response.
///
/// `textDocumentSync` is mandatory: without it the session can never become
/// ready. The optional capability set is logged present/absent but never
/// fails validation.
///
/// # Errors
///
/// [`Error::MissingCapability`] when `textDocumentSync` is absent.
pub fn validate_server_capabilities(capabilities: &ServerCapabilities) -> Result<()> {
	if capabilities.text_document_sync.is_none() {
		return Err(Error::MissingCapability("textDocumentSync"));
	}
	for (name, present) in optional_capabilities(capabilities) {
		if present {
			info!(capability = name, "ivy_lsp supports capability");
		} else {
			warn!(capability = name, "ivy_lsp does not report capability");
		}
	}
	Ok(())
}

/// Presence of each optional server capability, by wire name.
pub fn optional_capabilities(capabilities: &ServerCapabilities) -> [(&'static str, bool); 6] {
	[
		("completionProvider", capabilities.completion_provider.is_some()),
		("definitionProvider", capabilities.definition_provider.is_some()),
		("referencesProvider", capabilities.references_provider.is_some()),
		("documentSymbolProvider", capabilities.document_symbol_provider.is_some()),
		("workspaceSymbolProvider", capabilities.workspace_symbol_provider.is_some()),
		("hoverProvider", capabilities.hover_provider.is_some()),
	]
}

fn all_symbol_kinds() -> Vec<SymbolKind> {
	vec![
		SymbolKind::FILE,
		SymbolKind::MODULE,
		SymbolKind::NAMESPACE,
		SymbolKind::PACKAGE,
		SymbolKind::CLASS,
		SymbolKind::METHOD,
		SymbolKind::PROPERTY,
		SymbolKind::FIELD,
		SymbolKind::CONSTRUCTOR,
		SymbolKind::ENUM,
		SymbolKind::INTERFACE,
		SymbolKind::FUNCTION,
		SymbolKind::VARIABLE,
		SymbolKind::CONSTANT,
		SymbolKind::STRING,
		SymbolKind::NUMBER,
		SymbolKind::BOOLEAN,
		SymbolKind::ARRAY,
		SymbolKind::OBJECT,
		SymbolKind::KEY,
		SymbolKind::NULL,
		SymbolKind::ENUM_MEMBER,
		SymbolKind::STRUCT,
		SymbolKind::EVENT,
		SymbolKind::OPERATOR,
		SymbolKind::TYPE_PARAMETER,
	]
}
