use super::internal::InternalNode;

/// One step of a root-to-leaf descent: the internal node and the child index taken in it.
#[derive(Clone, Copy, Debug)]
pub struct Frame<'a> {
    pub node: &'a InternalNode,
    pub index: usize,
}

/// Ancestors of the node under modification, root first.
///
/// Built afresh by every descent. Frames borrow nodes that the descent's epoch guard keeps alive.
#[derive(Default, Debug)]
pub struct Stack<'a> {
    frames: Vec<Frame<'a>>,
}

impl<'a> Stack<'a> {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn push(&mut self, node: &'a InternalNode, index: usize) {
        self.frames.push(Frame { node, index });
    }

    pub fn pop(&mut self) -> Option<Frame<'a>> {
        self.frames.pop()
    }

    /// The direct parent of the node under modification.
    pub fn top(&self) -> Option<&Frame<'a>> {
        self.frames.last()
    }

    pub fn root(&self) -> Option<&Frame<'a>> {
        self.frames.first()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame<'a>> {
        self.frames.iter()
    }
}
