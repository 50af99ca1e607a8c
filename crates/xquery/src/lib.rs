pub mod compiler;
pub mod consts;
pub mod engine;
pub mod model;
pub mod modules;
pub mod parser;
pub mod runtime;
pub mod serializer;
pub mod tree;
pub mod xdm;
pub mod xml;

pub use compiler::{CompiledQuery, compile, compile_with_context};
pub use engine::deep_equal::deep_equal;
pub use engine::evaluator::{evaluate, evaluate_expr};
pub use model::{NodeKind, QName, XdmNode};
pub use modules::{FileModuleSource, ModuleCache, ModuleLocation, ModuleResolver, ModuleSource};
pub use runtime::{
    DynamicContext, DynamicContextBuilder, Error, ErrorCode, EvaluationConfig, Item, Sequence,
    StaticContext, StaticContextBuilder,
};
pub use serializer::{OutputMethod, SerializationOptions, serialize_sequence};
pub use tree::{Document, DocumentId, Fragment, Node, NodeId};
pub use xdm::{ExpandedName, XdmAtomicValue, XdmItem, XdmSequence};
