//! Parsed spreadsheet contents handed over by the upload step.

use serde::{Deserialize, Serialize};

/// Header plus data rows. Cells are raw strings; a row may be shorter than
/// the header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetData {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    /// Index of the first column named exactly `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Index of the first column whose trimmed name matches `name` ignoring case.
    pub fn column_index_ignore_case(&self, name: &str) -> Option<usize> {
        let wanted = name.trim().to_lowercase();
        self.columns
            .iter()
            .position(|c| c.trim().to_lowercase() == wanted)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_lookup() {
        let sheet = SheetData::new(
            vec!["ID Task".into(), "Priority".into()],
            vec![vec!["abc".into()]],
        );
        assert_eq!(sheet.column_index("Priority"), Some(1));
        assert_eq!(sheet.column_index("priority"), None);
        assert_eq!(sheet.column_index_ignore_case(" id task "), Some(0));
        assert_eq!(sheet.len(), 1);
    }
}
