//! Tree passes run between parsing and code generation
//!
//! A pass is a pair of node functions applied by [`walk`]: `enter` on the way
//! down, before a node's children are visited, and `leave` on the way up, after
//! they have been rebuilt. Each function returns the node to keep, which may be
//! the original or a replacement.

use tracing::debug;

use crate::data::PatternDataStore;
use crate::parser::ast::{BlockDecl, InclusionKind, MacroDecl, Node, Spanned, Template};

/// Post-order rewrite of a node list
pub fn walk<E, L>(nodes: Vec<Spanned<Node>>, enter: &mut E, leave: &mut L) -> Vec<Spanned<Node>>
where
    E: FnMut(Node) -> Node,
    L: FnMut(Node) -> Node,
{
    nodes
        .into_iter()
        .map(|spanned| spanned.map(|node| walk_node(node, enter, leave)))
        .collect()
}

fn walk_node<E, L>(node: Node, enter: &mut E, leave: &mut L) -> Node
where
    E: FnMut(Node) -> Node,
    L: FnMut(Node) -> Node,
{
    let node = match enter(node) {
        Node::Inclusion(mut inclusion) => {
            if let InclusionKind::Embed { blocks } = inclusion.kind {
                let blocks = blocks
                    .into_iter()
                    .map(|block| block.map(|decl| walk_block(decl, enter, leave)))
                    .collect();
                inclusion.kind = InclusionKind::Embed { blocks };
            }
            Node::Inclusion(inclusion)
        }
        Node::Block(decl) => Node::Block(walk_block(decl, enter, leave)),
        Node::If {
            branches,
            otherwise,
        } => Node::If {
            branches: branches
                .into_iter()
                .map(|(condition, body)| (condition, walk(body, enter, leave)))
                .collect(),
            otherwise: walk(otherwise, enter, leave),
        },
        Node::For {
            key,
            value,
            iterable,
            body,
            otherwise,
        } => Node::For {
            key,
            value,
            iterable,
            body: walk(body, enter, leave),
            otherwise: walk(otherwise, enter, leave),
        },
        Node::Macro(decl) => Node::Macro(MacroDecl {
            body: walk(decl.body, enter, leave),
            ..decl
        }),
        Node::Tag { name, body } => Node::Tag {
            name,
            body: walk(body, enter, leave),
        },
        leaf @ (Node::Text(_) | Node::Print(_) | Node::Set { .. }) => leaf,
    };
    leave(node)
}

fn walk_block<E, L>(decl: BlockDecl, enter: &mut E, leave: &mut L) -> BlockDecl
where
    E: FnMut(Node) -> Node,
    L: FnMut(Node) -> Node,
{
    BlockDecl {
        name: decl.name,
        body: walk(decl.body, enter, leave),
    }
}

/// A rewrite pass registered with the engine
///
/// Passes run in ascending priority order.
pub trait NodePass: Send + Sync {
    fn priority(&self) -> i32;

    fn enter(&self, node: Node) -> Node {
        node
    }

    fn leave(&self, node: Node) -> Node;
}

/// Run one pass over a whole template
pub fn apply(pass: &dyn NodePass, template: Template) -> Template {
    Template {
        nodes: walk(
            template.nodes,
            &mut |node| pass.enter(node),
            &mut |node| pass.leave(node),
        ),
    }
}

/// Binds auxiliary data to inclusions whose target is a literal
///
/// A matching inclusion with data in the store is replaced by its data-bound
/// variant carrying the store's snapshot. Already bound inclusions are never
/// matched again, so running the pass twice changes nothing.
pub struct DataBinding<S> {
    store: S,
}

impl<S: PatternDataStore> DataBinding<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: PatternDataStore> NodePass for DataBinding<S> {
    fn priority(&self) -> i32 {
        0
    }

    fn leave(&self, node: Node) -> Node {
        let Node::Inclusion(inclusion) = node else {
            return node;
        };
        if inclusion.is_bound() {
            return Node::Inclusion(inclusion);
        }
        let Some(key) = inclusion.literal_target() else {
            return Node::Inclusion(inclusion);
        };
        match self.store.lookup(key) {
            Some(data) => {
                debug!(partial = key, keys = data.len(), "bound pattern data");
                Node::Inclusion(inclusion.bind(data))
            }
            None => Node::Inclusion(inclusion),
        }
    }
}
