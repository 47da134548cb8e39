//! Persisted changeset records.

use prost::Message;
use std::collections::BTreeMap;

/// In-memory changeset form: key → new value, `None` for a delete.
pub(crate) type ChangeSet = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

#[derive(Clone, PartialEq, Message)]
pub(crate) struct ChangeSetPb {
    #[prost(message, repeated, tag = "1")]
    pub ops: Vec<ChangeOpPb>,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct ChangeOpPb {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub delete: bool,
}

pub(crate) fn encode_changeset(changeset: &ChangeSet) -> Vec<u8> {
    let ops = changeset
        .iter()
        .map(|(key, value)| match value {
            Some(value) => ChangeOpPb {
                key: key.clone(),
                value: value.clone(),
                delete: false,
            },
            None => ChangeOpPb {
                key: key.clone(),
                value: Vec::new(),
                delete: true,
            },
        })
        .collect();
    ChangeSetPb { ops }.encode_to_vec()
}

pub(crate) fn decode_changeset(bytes: &[u8]) -> Result<ChangeSet, prost::DecodeError> {
    let pb = ChangeSetPb::decode(bytes)?;
    Ok(pb
        .ops
        .into_iter()
        .map(|op| {
            if op.delete {
                (op.key, None)
            } else {
                (op.key, Some(op.value))
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changeset_roundtrip() {
        let mut changeset = ChangeSet::new();
        changeset.insert(b"set".to_vec(), Some(b"value".to_vec()));
        changeset.insert(b"del".to_vec(), None);
        changeset.insert(b"empty".to_vec(), Some(Vec::new()));

        let decoded = decode_changeset(&encode_changeset(&changeset)).unwrap();
        assert_eq!(decoded, changeset);
    }
}
