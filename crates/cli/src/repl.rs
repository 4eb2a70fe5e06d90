//! Line editing and multi-line form entry for the interactive session

use crate::reader::{self, ReadError};
use anyhow::Result;
use rustyline::{Config, Editor, error::ReadlineError, history::DefaultHistory};
use sable_runtime::Value;
use std::{fs, path::PathBuf};

const PROMPT: &str = "* ";
const CONTINUED_PROMPT: &str = "  ";
const HISTORY_DIR: &str = ".sable";
const HISTORY_FILE: &str = "history.txt";

/// The interactive line reader: accumulates lines until they read as one
/// complete form
pub struct Repl {
    editor: Editor<(), DefaultHistory>,
    continued_lines: Vec<String>,
}

impl Repl {
    /// Initializes the editor and loads the persisted history, if any
    pub fn new() -> Result<Self> {
        let config = Config::builder().max_history_size(100)?.build();
        let mut editor: Editor<(), DefaultHistory> = Editor::with_config(config)?;
        if let Some(path) = history_path() {
            // A missing history file is fine on first run
            let _ = editor.load_history(&path);
        }
        Ok(Self {
            editor,
            continued_lines: Vec::new(),
        })
    }

    /// Reads the next complete top-level form, or `None` at end of input
    ///
    /// Incomplete input continues onto the next line; ^C abandons the form in
    /// progress; read errors are reported here and reading continues.
    pub fn read_form(&mut self) -> Result<Option<Value>> {
        loop {
            let prompt = if self.continued_lines.is_empty() {
                PROMPT
            } else {
                CONTINUED_PROMPT
            };
            match self.editor.readline(prompt) {
                Ok(line) => {
                    self.continued_lines.push(line);
                    let input = self.continued_lines.join("\n");
                    match reader::read_one(&input) {
                        Ok(Some(form)) => {
                            self.editor.add_history_entry(&input)?;
                            self.continued_lines.clear();
                            return Ok(Some(form));
                        }
                        Ok(None) => self.continued_lines.clear(),
                        Err(ReadError::Incomplete) => {}
                        Err(error) => {
                            self.editor.add_history_entry(&input)?;
                            self.continued_lines.clear();
                            eprintln!("read error: {error}");
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    self.continued_lines.clear();
                }
                Err(ReadlineError::Eof) => return Ok(None),
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Persists the session's history
    pub fn save_history(&mut self) -> Result<()> {
        if let Some(mut dir) = history_dir() {
            fs::create_dir_all(&dir)?;
            dir.push(HISTORY_FILE);
            self.editor.save_history(&dir)?;
        }
        Ok(())
    }
}

fn history_dir() -> Option<PathBuf> {
    home::home_dir().map(|mut dir| {
        dir.push(HISTORY_DIR);
        dir
    })
}

fn history_path() -> Option<PathBuf> {
    history_dir().map(|mut dir| {
        dir.push(HISTORY_FILE);
        dir
    })
}
