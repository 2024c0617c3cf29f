// ABOUTME: Shared SQL-building helpers for parameter batching and composite keys
// ABOUTME: Used by the postgres/mysql/sqlite adapters to stay under parameter-count limits

use crate::schema::RowKey;
use std::collections::HashSet;

/// Splits a key set into batches sized so that `batch_size` total bound
/// parameters are never exceeded, given `columns_per_key` parameters per key
/// (e.g. 2 for a composite two-column FK).
pub fn effective_batch_size(batch_size: usize, columns_per_key: usize) -> usize {
    (batch_size / columns_per_key.max(1)).max(1)
}

pub fn batch_keys<'a>(
    keys: &'a HashSet<RowKey>,
    columns_per_key: usize,
    batch_size: usize,
) -> Vec<Vec<&'a RowKey>> {
    let chunk = effective_batch_size(batch_size, columns_per_key);
    let mut sorted: Vec<&RowKey> = keys.iter().collect();
    sorted.sort();
    sorted.chunks(chunk).map(|c| c.to_vec()).collect()
}

/// Builds a single-column `IN (...)` clause's placeholder list, e.g. for
/// 3 keys starting at `$1`: `$1, $2, $3`.
pub fn in_clause_placeholders(start: usize, count: usize, prefix: char) -> String {
    (0..count)
        .map(|i| format!("{}{}", prefix, start + i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builds an OR-of-AND-equality group for composite keys, e.g. two
/// two-column keys starting at `$1`:
/// `($1 = $1 AND $2 = $2) OR ($3 = $3 AND $4 = $4)` — actual column names are
/// substituted by the caller; this only manages placeholder numbering.
pub fn composite_or_groups(columns: &[String], key_count: usize, start: usize, prefix: char) -> String {
    let mut groups = Vec::with_capacity(key_count);
    let mut param = start;
    for _ in 0..key_count {
        let mut conds = Vec::with_capacity(columns.len());
        for col in columns {
            conds.push(format!("{} = {}{}", col, prefix, param));
            param += 1;
        }
        groups.push(format!("({})", conds.join(" AND ")));
    }
    groups.join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_batch_size_divides_by_column_count() {
        assert_eq!(effective_batch_size(1000, 1), 1000);
        assert_eq!(effective_batch_size(1000, 4), 250);
        assert_eq!(effective_batch_size(1000, 0), 1000);
    }

    #[test]
    fn batches_keys_respecting_limit() {
        let keys: HashSet<RowKey> = (0..10).map(|i| RowKey(vec![i.to_string()])).collect();
        let batches = batch_keys(&keys, 1, 4);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 4);
        assert_eq!(batches[2].len(), 2);
    }

    #[test]
    fn composite_or_groups_numbers_placeholders_sequentially() {
        let cols = vec!["a".to_string(), "b".to_string()];
        let clause = composite_or_groups(&cols, 2, 1, '$');
        assert_eq!(clause, "(a = $1 AND b = $2) OR (a = $3 AND b = $4)");
    }
}
