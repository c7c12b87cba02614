// Corpus module
// Loads saved chat transcripts and knowledge text files into documents


use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{RagError, Result};

/// Sender value that marks a message as written by the assistant
pub const ASSISTANT_SENDER: &str = "ai";

const TITLE_MARKER: &str = "Title:";
const CONTENT_MARKER: &str = "Content:";
const UNTITLED_CHAT: &str = "New Chat";

/// A unit of retrievable text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub meta: DocumentMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// Originating file name
    pub source: String,
}

impl Document {
    #[inline]
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            meta: DocumentMeta {
                source: source.into(),
            },
        }
    }
}

/// Documents produced by a scan, with counts of what was skipped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusLoad {
    pub documents: Vec<Document>,
    pub files_read: usize,
    /// Files that could not be read or parsed
    pub skipped_files: usize,
    /// Messages or text entries that lacked required fields
    pub skipped_entries: usize,
}

impl CorpusLoad {
    #[inline]
    pub fn extend(&mut self, other: CorpusLoad) {
        self.documents.extend(other.documents);
        self.files_read += other.files_read;
        self.skipped_files += other.skipped_files;
        self.skipped_entries += other.skipped_entries;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ChatFile {
    /// Kept loose so one odd message cannot sink the rest of the file
    #[serde(default)]
    messages: Vec<Value>,
}

fn message_field<'a>(message: &'a Value, key: &str) -> Option<&'a str> {
    message.get(key).and_then(Value::as_str)
}

/// Title shown for a saved chat file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedChatSummary {
    pub filename: String,
    pub title: String,
}

/// Load saved chats and knowledge texts, chats first
#[inline]
pub fn load_corpus(chat_dir: &Path, text_dir: &Path) -> CorpusLoad {
    let mut load = load_saved_chats(chat_dir);
    load.extend(load_text_files(text_dir));

    info!(
        "Loaded {} documents from {} files ({} files skipped, {} entries skipped)",
        load.documents.len(),
        load.files_read,
        load.skipped_files,
        load.skipped_entries
    );

    load
}

/// One document per assistant message in every `*.json` file under `dir`
///
/// A missing directory yields an empty load. Unparseable files are logged and
/// skipped without aborting the scan.
#[inline]
pub fn load_saved_chats(dir: &Path) -> CorpusLoad {
    let mut load = CorpusLoad::default();

    for path in list_files(dir, "json") {
        let filename = file_name(&path);
        let chat = match read_chat_file(&path) {
            Ok(chat) => chat,
            Err(e) => {
                warn!("Error reading {}: {}", filename, e);
                load.skipped_files += 1;
                continue;
            }
        };
        load.files_read += 1;

        for message in &chat.messages {
            match (
                message_field(message, "sender"),
                message_field(message, "text"),
            ) {
                (Some(sender), Some(text)) => {
                    if sender == ASSISTANT_SENDER {
                        load.documents.push(Document::new(text, filename.clone()));
                    }
                }
                _ => load.skipped_entries += 1,
            }
        }
    }

    debug!(
        "Loaded {} assistant messages from {}",
        load.documents.len(),
        dir.display()
    );
    load
}

/// One document per `Title:`/`Content:` section in every `*.txt` file under `dir`
#[inline]
pub fn load_text_files(dir: &Path) -> CorpusLoad {
    let mut load = CorpusLoad::default();

    for path in list_files(dir, "txt") {
        let filename = file_name(&path);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Error reading {}: {}", filename, e);
                load.skipped_files += 1;
                continue;
            }
        };
        load.files_read += 1;

        let (entries, skipped) = parse_knowledge_entries(&content);
        load.skipped_entries += skipped;
        load.documents.extend(
            entries
                .into_iter()
                .map(|text| Document::new(text, filename.clone())),
        );
    }

    debug!(
        "Loaded {} knowledge entries from {}",
        load.documents.len(),
        dir.display()
    );
    load
}

/// Split file content on blank lines and keep entries with both markers
///
/// Returns the `title\ncontent` texts and the number of entries dropped.
#[inline]
pub fn parse_knowledge_entries(content: &str) -> (Vec<String>, usize) {
    let normalized = content.replace("\r\n", "\n");
    let mut entries = Vec::new();
    let mut skipped = 0;

    for entry in normalized.trim().split("\n\n") {
        match parse_entry(entry) {
            Some(text) => entries.push(text),
            None => {
                if !entry.trim().is_empty() {
                    skipped += 1;
                }
            }
        }
    }

    (entries, skipped)
}

fn parse_entry(entry: &str) -> Option<String> {
    if !entry.contains(TITLE_MARKER) || !entry.contains(CONTENT_MARKER) {
        return None;
    }

    let (_, after_title) = entry.split_once(TITLE_MARKER)?;
    let title = after_title.split(CONTENT_MARKER).next()?.trim();
    let content = entry.split(CONTENT_MARKER).nth(1)?.trim();

    Some(format!("{}\n{}", title, content))
}

/// Every message of one saved chat, regardless of sender
///
/// An empty name or a missing file yields no documents. Names containing path
/// components are rejected.
#[inline]
pub fn load_chat_session(dir: &Path, filename: &str) -> Result<Vec<Document>> {
    if filename.trim().is_empty() {
        return Ok(Vec::new());
    }

    if filename.contains(['/', '\\']) || filename.contains("..") {
        return Err(RagError::InvalidRequest(format!(
            "chat_filename must be a plain file name: {}",
            filename
        )));
    }

    let path = dir.join(filename);
    if !path.is_file() {
        debug!("Chat session {} not found", path.display());
        return Ok(Vec::new());
    }

    let chat = read_chat_file(&path)
        .map_err(|e| RagError::Corpus(format!("Failed to read {}: {}", filename, e)))?;

    Ok(chat
        .messages
        .iter()
        .filter_map(|message| message_field(message, "text"))
        .map(|text| Document::new(text, filename))
        .collect())
}

/// File name and title of every saved chat
#[inline]
pub fn list_saved_chats(dir: &Path) -> Vec<SavedChatSummary> {
    list_files(dir, "json")
        .into_iter()
        .filter_map(|path| {
            let filename = file_name(&path);
            match read_chat_file(&path) {
                Ok(chat) => {
                    let title = chat
                        .messages
                        .first()
                        .and_then(|message| message_field(message, "text"))
                        .unwrap_or(UNTITLED_CHAT)
                        .to_string();
                    Some(SavedChatSummary { filename, title })
                }
                Err(e) => {
                    warn!("Error reading {}: {}", filename, e);
                    None
                }
            }
        })
        .collect()
}

fn read_chat_file(path: &Path) -> anyhow::Result<ChatFile> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Regular files in `dir` with the given extension, sorted by name
fn list_files(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Skipping {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
        })
        .collect();
    files.sort();
    files
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
