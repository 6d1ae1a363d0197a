use crate::entity::EntityState;
use crate::metadata::{EntityMetadata, FieldKind};

/// `integerSequence` entry backing sequence fields.
///
/// Values are handed out by
/// [`EntityManager::next_sequence_value`](crate::manager::EntityManager::next_sequence_value);
/// this type exists to create and inspect sequences.
#[derive(Debug, Clone, Default)]
pub struct IntegerSequence {
    pub cn: Option<String>,
    pub next_value: Option<i64>,
    /// Step between values; 1 when unset.
    pub increment: Option<i64>,
    pub description: Option<String>,
    pub parent: Option<String>,
    state: EntityState,
}

impl IntegerSequence {
    pub fn new(cn: impl Into<String>, parent: impl Into<String>, start: i64) -> Self {
        Self {
            cn: Some(cn.into()),
            next_value: Some(start),
            parent: Some(parent.into()),
            ..Default::default()
        }
    }

    pub fn with_increment(mut self, increment: i64) -> Self {
        self.increment = Some(increment);
        self
    }
}

fn integer_sequence_metadata() -> EntityMetadata {
    EntityMetadata::builder("integerSequence")
        .dn_template("cn={{ entity.cn }},{{{ entity.parent }}}")
        .attribute("cn", "cn", FieldKind::Text)
        .must()
        .attribute("next_value", "nextValue", FieldKind::Integer)
        .must()
        .attribute("increment", "increment", FieldKind::Integer)
        .attribute("description", "description", FieldKind::Text)
        .unique_identifier("cn")
        .parent_link("parent")
        .build()
        .expect("integerSequence metadata is valid")
}

crate::impl_entity!(
    IntegerSequence,
    integer_sequence_metadata,
    fields: [cn, next_value, increment, description, parent]
);
