//! Library modules stored in the database.

use crate::collection::Resource;
use crate::database::DbInner;
use crate::path;
use std::sync::Weak;
use sylva_xquery::runtime::{Error, ErrorCode};
use sylva_xquery::{ModuleLocation, ModuleSource};

/// Serves `xmldb:exist:///db/...` module locations from binary resources.
pub(crate) struct DatabaseModuleSource {
    db: Weak<DbInner>,
}

impl DatabaseModuleSource {
    pub(crate) fn new(db: Weak<DbInner>) -> Self {
        Self { db }
    }
}

impl ModuleSource for DatabaseModuleSource {
    fn load(&self, location: &ModuleLocation) -> Result<Option<String>, Error> {
        let ModuleLocation::Database(resource) = location else {
            return Ok(None);
        };
        let Some(db) = self.db.upgrade() else {
            return Ok(None);
        };
        let Some((collection, name)) = path::split(resource) else {
            return Ok(None);
        };
        let tree = db.tree.read();
        match tree.resource(collection, name) {
            Some(Resource::Binary(bytes)) => String::from_utf8(bytes.to_vec()).map(Some).map_err(|_| {
                Error::from_code(
                    ErrorCode::XQST0059,
                    format!("module {location} is not valid UTF-8"),
                )
            }),
            Some(Resource::Xml(_)) => Err(Error::from_code(
                ErrorCode::XQST0059,
                format!("{location} is an XML document, not a module"),
            )),
            None => Ok(None),
        }
    }
}
