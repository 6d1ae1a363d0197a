//! Stock entity types
//!
//! Mappings for the common LDAP object classes and for Active Directory
//! users and groups. Each type has a `parent` field holding the DN of the
//! container: it is filled on hydration, and the DN template of a new
//! entity is built from it.

mod active_directory;
mod group;
mod organizational_unit;
mod person;
mod sequence;

pub use active_directory::{AdGroup, AdUser, UAC_ACCOUNT_DISABLE, UAC_NORMAL_ACCOUNT};
pub use group::GroupOfNames;
pub use organizational_unit::OrganizationalUnit;
pub use person::{InetOrgPerson, Person};
pub use sequence::IntegerSequence;
