//! Object name normalization
//!
//! Every name is cleaned before it reaches a backend so that `a\b.txt`,
//! `a//b.txt` and `./a/b.txt` all address the same object.

use crate::{Error, Result};

/// Normalize `name` into a forward-slash path with no `.`/`..` segments.
pub fn clean_name(name: &str) -> Result<String> {
    let unified = name.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();

    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if segments.pop().is_none() {
                    return Err(Error::InvalidName(format!(
                        "'{}' escapes the container root",
                        name
                    )));
                }
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(Error::InvalidName(format!("'{}' is empty", name)));
    }

    Ok(segments.join("/"))
}
