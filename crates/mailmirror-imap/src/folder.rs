//! Folder resolution and read-only selection.

#![allow(clippy::missing_errors_doc)]

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::parser::{self, Value};
use crate::session::Session;
use crate::{Error, Result};

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Resolves the folder to mirror by flag.
    ///
    /// Issues `LIST "" "*"` and returns the name token of the first mailbox
    /// whose flag list contains `folder_flag` exactly (case-sensitive,
    /// leading backslash included). The name is re-serialized so a quoted
    /// token stays quoted; it is handed to EXAMINE unchanged.
    pub async fn resolve_folder(&mut self, folder_flag: &str) -> Result<String> {
        let listings = self.run("LIST \"\" \"*\"").await?;

        for payload in listings {
            let items = parser::parse(&payload)?;
            if items
                .first()
                .and_then(Value::as_text)
                .is_none_or(|verb| !verb.eq_ignore_ascii_case("LIST"))
            {
                continue;
            }

            let Some(flags) = items.get(1).and_then(Value::as_list) else {
                continue;
            };
            let matched = flags
                .iter()
                .filter_map(Value::as_text)
                .any(|flag| flag == folder_flag);
            if !matched {
                continue;
            }

            // LIST (flags) "delim" name
            let Some(name) = items.get(3) else { continue };
            let name = serialize_name(name);
            debug!(folder = %name, flag = folder_flag, "folder matched by flag");
            return Ok(name);
        }

        Err(Error::FolderNotFound(folder_flag.to_string()))
    }

    /// Opens the folder read-only with EXAMINE. The name is used verbatim.
    pub async fn examine(&mut self, folder: &str) -> Result<()> {
        let data = self.run(&format!("EXAMINE {folder}")).await?;

        for payload in &data {
            let text = String::from_utf8_lossy(payload);
            let mut words = text.split_ascii_whitespace();
            if let (Some(count), Some(word)) = (words.next(), words.next())
                && word.eq_ignore_ascii_case("EXISTS")
            {
                info!(folder, exists = count, "folder opened read-only");
            }
        }

        Ok(())
    }
}

/// Re-serializes a LIST name token, preserving its quoted form.
fn serialize_name(value: &Value) -> String {
    match value {
        Value::Atom(s) => s.clone(),
        Value::Quoted(s) => {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('"');
            for c in s.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
            out
        }
        Value::Literal(data) => {
            let mut out = String::from("\"");
            for c in String::from_utf8_lossy(data).chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
            out
        }
        Value::List(_) => String::new(),
    }
}
