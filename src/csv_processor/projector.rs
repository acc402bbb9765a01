use crate::record::Record;

/// Lays `record` out along `columns`. Missing fields become empty strings and
/// fields outside `columns` are dropped.
pub fn project<'a>(record: &'a Record, columns: &[String]) -> Vec<&'a str> {
    columns
        .iter()
        .map(|name| record.get(name).unwrap_or(""))
        .collect()
}

/// Builds a record from a header and a positional row. Extra trailing values
/// without a header are ignored.
pub fn record_from_row<'a, I>(headers: &[String], row: I) -> Record
where
    I: IntoIterator<Item = &'a str>,
{
    let mut record = Record::with_capacity(headers.len());
    for (name, value) in headers.iter().zip(row) {
        record.insert(name.as_str(), value);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_fields_are_empty() {
        let record = Record::from([("a", "1")]);
        assert_eq!(project(&record, &columns(&["a", "b"])), vec!["1", ""]);
    }

    #[test]
    fn test_extra_fields_are_dropped() {
        let record = Record::from([("a", "1"), ("b", "2"), ("c", "3")]);
        assert_eq!(project(&record, &columns(&["c", "a"])), vec!["3", "1"]);
    }

    #[test]
    fn test_projection_is_idempotent() {
        let record = Record::from([("a", "1"), ("b", "2")]);
        let cols = columns(&["b", "x", "a"]);
        assert_eq!(project(&record, &cols), project(&record, &cols));
    }

    #[test]
    fn test_empty_columns() {
        let record = Record::from([("a", "1")]);
        assert!(project(&record, &[]).is_empty());
    }

    #[test]
    fn test_record_from_row() {
        let headers = columns(&["a", "b"]);
        let record = record_from_row(&headers, vec!["1", "2"]);
        assert_eq!(record, Record::from([("a", "1"), ("b", "2")]));
    }
}
