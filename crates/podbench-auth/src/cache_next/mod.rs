//! Helpers behind the `PersistentCache` facade.

pub(crate) mod io;
pub(crate) mod keys;
