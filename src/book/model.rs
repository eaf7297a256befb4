//! Book records.

use serde::{Deserialize, Serialize};

use crate::error::BookError;

/// A stored book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: u32,
    pub title: String,
    pub author: String,
}

/// Fields supplied when creating or replacing a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,
    #[serde(default)]
    pub author: String,
}

impl NewBook {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
        }
    }

    pub fn validate(&self) -> Result<(), BookError> {
        if self.title.trim().is_empty() {
            return Err(BookError::InvalidArgument("title must not be empty".into()));
        }
        Ok(())
    }

    pub fn into_book(self, id: u32) -> Book {
        Book {
            id,
            title: self.title,
            author: self.author,
        }
    }
}
