use crate::record::Record;
use std::collections::HashSet;

/// How a write stream without an explicit column list finds its columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnDiscovery {
    /// Hold every record until end of input, then take the union of keys.
    #[default]
    Buffered,
    /// Fix the columns from the first record and stream from there on.
    FirstRecord,
}

/// Returns the configured columns if any, else the union of record keys in
/// order of first appearance.
pub fn resolve_columns<'a, I>(records: I, configured: Option<&[String]>) -> Vec<String>
where
    I: IntoIterator<Item = &'a Record>,
{
    if let Some(columns) = configured.filter(|c| !c.is_empty()) {
        return columns.to_vec();
    }

    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for record in records {
        for key in record.keys() {
            if seen.insert(key) {
                columns.push(key.to_string());
            }
        }
    }
    columns
}

/// Columns for a stream that commits to the first record it sees.
pub fn columns_from_first(record: &Record) -> Vec<String> {
    record.keys().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(columns: &[String]) -> Vec<&str> {
        columns.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_union_in_first_seen_order() {
        let records = vec![
            Record::from([("a", "1"), ("b", "2")]),
            Record::from([("a", "3"), ("c", "4")]),
            Record::from([("d", "5"), ("b", "6")]),
        ];
        let columns = resolve_columns(&records, None);
        assert_eq!(names(&columns), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_configured_is_verbatim() {
        let records = vec![Record::from([("a", "1"), ("b", "2")])];
        let configured = vec!["z".to_string(), "a".to_string()];
        let columns = resolve_columns(&records, Some(configured.as_slice()));
        assert_eq!(names(&columns), vec!["z", "a"]);
    }

    #[test]
    fn test_empty_configured_falls_back_to_discovery() {
        let records = vec![Record::from([("a", "1")])];
        let columns = resolve_columns(&records, Some(&[][..]));
        assert_eq!(names(&columns), vec!["a"]);
    }

    #[test]
    fn test_empty_batch() {
        let columns = resolve_columns(&Vec::<Record>::new(), None);
        assert!(columns.is_empty());
    }

    #[test]
    fn test_first_record_columns() {
        let record = Record::from([("b", "1"), ("a", "2")]);
        assert_eq!(names(&columns_from_first(&record)), vec!["b", "a"]);
    }
}
