//! The collection hierarchy and the resources stored in it.

use crate::error::{Result, StoreError};
use crate::path::{self, ROOT};
use std::collections::BTreeMap;
use std::sync::Arc;
use sylva_xquery::{Document, DocumentId};

#[derive(Clone)]
pub enum Resource {
    Xml(Arc<Document>),
    /// Non-XML content such as library modules.
    Binary(Arc<Vec<u8>>),
}

impl Resource {
    pub fn document(&self) -> Option<&Arc<Document>> {
        match self {
            Resource::Xml(d) => Some(d),
            Resource::Binary(_) => None,
        }
    }
}

#[derive(Default)]
pub struct Collection {
    pub resources: BTreeMap<String, Resource>,
}

/// Collections keyed by normalized path. `/db` always exists.
pub struct CollectionTree {
    collections: BTreeMap<String, Collection>,
    locations: BTreeMap<DocumentId, String>,
}

impl Default for CollectionTree {
    fn default() -> Self {
        let mut collections = BTreeMap::new();
        collections.insert(ROOT.to_string(), Collection::default());
        Self {
            collections,
            locations: BTreeMap::new(),
        }
    }
}

impl CollectionTree {
    pub fn exists(&self, collection: &str) -> bool {
        self.collections.contains_key(collection)
    }

    /// Create `collection` and any missing ancestors. Returns the paths created.
    pub fn create(&mut self, collection: &str) -> Vec<String> {
        let mut created = Vec::new();
        let mut current = String::new();
        for segment in collection.trim_start_matches('/').split('/') {
            current.push('/');
            current.push_str(segment);
            if !self.collections.contains_key(&current) {
                self.collections.insert(current.clone(), Collection::default());
                created.push(current.clone());
            }
        }
        created
    }

    /// Remove a collection with everything below it, returning the removed documents.
    pub fn remove(&mut self, collection: &str) -> Result<Vec<Arc<Document>>> {
        if collection == ROOT {
            return Err(StoreError::InvalidPath(collection.to_string()));
        }
        if !self.exists(collection) {
            return Err(StoreError::CollectionNotFound(collection.to_string()));
        }
        let doomed: Vec<String> = self
            .collections
            .keys()
            .filter(|p| path::is_within(p, collection))
            .cloned()
            .collect();
        let mut removed = Vec::new();
        for p in doomed {
            if let Some(col) = self.collections.remove(&p) {
                removed.extend(col.resources.into_values().filter_map(|r| r.document().cloned()));
            }
        }
        for doc in &removed {
            self.locations.remove(&doc.id());
        }
        Ok(removed)
    }

    /// Direct child collections' names.
    pub fn children(&self, collection: &str) -> Vec<String> {
        self.collections
            .keys()
            .filter_map(|p| match path::split(p) {
                Some((parent, name)) if parent == collection => Some(name.to_string()),
                _ => None,
            })
            .collect()
    }

    pub fn resources(&self, collection: &str) -> Result<&BTreeMap<String, Resource>> {
        self.collections
            .get(collection)
            .map(|c| &c.resources)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))
    }

    pub fn resource(&self, collection: &str, name: &str) -> Option<&Resource> {
        self.collections.get(collection)?.resources.get(name)
    }

    /// Put a resource, returning the one it replaced.
    pub fn insert(&mut self, collection: &str, name: &str, resource: Resource) -> Result<Option<Resource>> {
        let col = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        if let Resource::Xml(doc) = &resource {
            self.locations.insert(doc.id(), path::join(collection, name));
        }
        let old = col.resources.insert(name.to_string(), resource);
        if let Some(Resource::Xml(doc)) = &old {
            self.locations.remove(&doc.id());
        }
        Ok(old)
    }

    pub fn take(&mut self, collection: &str, name: &str) -> Result<Resource> {
        let removed = self
            .collections
            .get_mut(collection)
            .and_then(|c| c.resources.remove(name))
            .ok_or_else(|| StoreError::ResourceNotFound(path::join(collection, name)))?;
        if let Resource::Xml(doc) = &removed {
            self.locations.remove(&doc.id());
        }
        Ok(removed)
    }

    /// Path a stored document lives at.
    pub fn location(&self, id: DocumentId) -> Option<&str> {
        self.locations.get(&id).map(String::as_str)
    }

    /// Documents in `collection` and its descendants, in path order.
    pub fn documents_under(&self, collection: &str) -> Vec<Arc<Document>> {
        self.collections
            .iter()
            .filter(|(p, _)| path::is_within(p, collection))
            .flat_map(|(_, c)| c.resources.values().filter_map(|r| r.document().cloned()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sylva_xquery::xml::{ParseOptions, parse_document};

    fn xml(text: &str) -> Resource {
        Resource::Xml(parse_document(text, None, true, ParseOptions::default()).unwrap())
    }

    #[test]
    fn create_fills_in_ancestors() {
        let mut tree = CollectionTree::default();
        assert_eq!(tree.create("/db/a/b"), vec!["/db/a", "/db/a/b"]);
        assert!(tree.create("/db/a").is_empty());
        assert_eq!(tree.children("/db"), vec!["a"]);
    }

    #[test]
    fn remove_takes_the_subtree() {
        let mut tree = CollectionTree::default();
        tree.create("/db/a/b");
        tree.create("/db/ab");
        tree.insert("/db/a/b", "x.xml", xml("<x/>")).unwrap();
        tree.insert("/db/ab", "y.xml", xml("<y/>")).unwrap();
        let removed = tree.remove("/db/a").unwrap();
        assert_eq!(removed.len(), 1);
        assert!(tree.exists("/db/ab"));
        assert_eq!(tree.documents_under("/db").len(), 1);
        assert!(matches!(tree.remove("/db"), Err(StoreError::InvalidPath(_))));
    }

    #[test]
    fn locations_track_documents() {
        let mut tree = CollectionTree::default();
        let res = xml("<x/>");
        let id = res.document().unwrap().id();
        tree.insert("/db", "x.xml", res).unwrap();
        assert_eq!(tree.location(id), Some("/db/x.xml"));
        tree.take("/db", "x.xml").unwrap();
        assert_eq!(tree.location(id), None);
        assert!(matches!(tree.take("/db", "x.xml"), Err(StoreError::ResourceNotFound(_))));
    }
}
