//! Per-call request descriptors
//!
//! Built for every enhanced-client call; used to derive cache keys and the
//! cache prefixes a mutation invalidates.

use std::fmt;

use clinview_domain::{ResourceType, SearchParams};

/// Kind of FHIR interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Search,
    Read,
    Create,
    Update,
    Delete,
    Batch,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Search => "search",
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Batch => "batch",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a call does and to which resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub resource_type: ResourceType,
    pub operation: Operation,
    pub id: Option<String>,
    pub params: Option<SearchParams>,
    /// Resource types written by a batch
    pub touched: Vec<ResourceType>,
}

impl RequestDescriptor {
    fn new(resource_type: ResourceType, operation: Operation) -> Self {
        Self { resource_type, operation, id: None, params: None, touched: Vec::new() }
    }

    pub fn search(resource_type: ResourceType, params: SearchParams) -> Self {
        Self { params: Some(params), ..Self::new(resource_type, Operation::Search) }
    }

    pub fn read(resource_type: ResourceType, id: impl Into<String>) -> Self {
        Self { id: Some(id.into()), ..Self::new(resource_type, Operation::Read) }
    }

    pub fn create(resource_type: ResourceType) -> Self {
        Self::new(resource_type, Operation::Create)
    }

    pub fn update(resource_type: ResourceType, id: impl Into<String>) -> Self {
        Self { id: Some(id.into()), ..Self::new(resource_type, Operation::Update) }
    }

    pub fn delete(resource_type: ResourceType, id: impl Into<String>) -> Self {
        Self { id: Some(id.into()), ..Self::new(resource_type, Operation::Delete) }
    }

    pub fn batch(touched: Vec<ResourceType>) -> Self {
        Self { touched, ..Self::new(ResourceType::Bundle, Operation::Batch) }
    }

    /// Reads are cached; everything else is not
    pub fn is_read(&self) -> bool {
        matches!(self.operation, Operation::Search | Operation::Read)
    }

    /// `<ResourceType>:<operation>:<canonical args>` for reads.
    ///
    /// Search args are the canonical (sorted) parameter rendering; read args
    /// are the resource id.
    pub fn cache_key(&self) -> Option<String> {
        let args = match self.operation {
            Operation::Search => {
                self.params.as_ref().map(SearchParams::canonical).unwrap_or_else(|| "{}".into())
            }
            Operation::Read => self.id.clone().unwrap_or_default(),
            _ => return None,
        };
        Some(format!("{}:{}:{}", self.resource_type, self.operation, args))
    }

    /// Cache key prefixes made stale by a successful mutation
    pub fn invalidated_prefixes(&self) -> Vec<String> {
        match self.operation {
            Operation::Create | Operation::Update | Operation::Delete => {
                vec![cache_prefix(&self.resource_type)]
            }
            Operation::Batch => self.touched.iter().map(cache_prefix).collect(),
            Operation::Search | Operation::Read => Vec::new(),
        }
    }
}

/// Prefix shared by every cache key of a resource type
pub fn cache_prefix(resource_type: &ResourceType) -> String {
    format!("{resource_type}:")
}
