use super::value::Value;
use smallvec::SmallVec;

/// An ordered sequence of key/value entries.
///
/// Lookup and update are linear; a new key appends. There is no deletion:
/// assigning nil overwrites the entry in place, so iteration order stays
/// insertion order for the table's whole life.
#[derive(Default)]
pub struct Table {
    entries: SmallVec<[(Value, Value); 16]>,
}

impl Table {
    /// First entry whose key equals `key` (Lua equality, so integer and float
    /// keys unify); misses yield nil.
    pub fn get(&self, key: impl Into<Value>) -> Value {
        let key = key.into();

        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    pub fn set(&mut self, key: impl Into<Value>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();

        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Entry count, nil-overwritten entries included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut table = Table::default();
        let keys = [Value::from(1), Value::from("one"), Value::from(2.5)];

        for (i, key) in keys.iter().enumerate() {
            table.set(key.clone(), i as i64);
        }

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.get(key.clone()), Value::Integer(i as i64));
        }

        assert_eq!(table.get("missing"), Value::Nil);
    }

    #[test]
    fn overwrite_keeps_order_and_len() {
        let mut table = Table::default();
        table.set("a", 1);
        table.set("b", 2);
        table.set("a", 3);

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("a"), Value::Integer(3));

        let keys: Vec<_> = table.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![Value::from("a"), Value::from("b")]);
    }

    #[test]
    fn integer_and_float_keys_unify() {
        let mut table = Table::default();
        table.set(1, "int");
        table.set(1.0, "float");

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(1), Value::from("float"));
    }

    #[test]
    fn nil_assignment_does_not_shrink() {
        let mut table = Table::default();
        table.set("a", 1);
        table.set("a", Value::Nil);

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("a"), Value::Nil);
    }
}
