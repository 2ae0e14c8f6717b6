use agora_api::{Comment, CommentId};

/// A comment with its directly nested replies.
///
/// Nesting is capped at one level: a reply never carries replies of its
/// own, and `reply_count` must equal `replies.len()` after every merge.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
    pub reply_count: u32,
}

impl CommentNode {
    fn leaf(comment: Comment) -> CommentNode {
        CommentNode {
            comment,
            replies: Vec::new(),
            reply_count: 0,
        }
    }

    pub fn id(&self) -> CommentId {
        self.comment.id
    }

    /// This node plus all its replies
    pub fn subtree_len(&self) -> u32 {
        1 + self.replies.len() as u32
    }
}

/// Where a comment sits in the tree
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placement {
    TopLevel { index: usize },
    Reply { parent: CommentId, index: usize },
}

/// A removed subtree, with enough information to reinsert it at its
/// original position
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemovedComment {
    pub node: CommentNode,
    pub placement: Placement,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReplyInsert {
    Inserted,
    AlreadyPresent,
    /// The parent is gone; the comment is handed back to the caller
    ParentNotFound(Comment),
}

/// Top-level comments ordered newest first, each with one level of replies
/// in insertion order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommentTree {
    top: Vec<CommentNode>,
}

impl CommentTree {
    pub fn new() -> CommentTree {
        CommentTree::default()
    }

    pub fn top_level(&self) -> &[CommentNode] {
        &self.top
    }

    /// Total number of nodes, replies included
    pub fn len(&self) -> u32 {
        self.top.iter().map(|n| n.subtree_len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_empty()
    }

    pub fn contains(&self, id: CommentId) -> bool {
        self.find(id).is_some()
    }

    pub fn find(&self, id: CommentId) -> Option<(Placement, &CommentNode)> {
        for (i, node) in self.top.iter().enumerate() {
            if node.id() == id {
                return Some((Placement::TopLevel { index: i }, node));
            }
            for (j, reply) in node.replies.iter().enumerate() {
                if reply.id() == id {
                    return Some((
                        Placement::Reply {
                            parent: node.id(),
                            index: j,
                        },
                        reply,
                    ));
                }
            }
        }
        None
    }

    /// Prepend a top-level comment (newest-first ordering)
    pub fn insert_top_level(&mut self, comment: Comment) -> InsertOutcome {
        if self.contains(comment.id) {
            return InsertOutcome::AlreadyPresent;
        }
        self.top.insert(0, CommentNode::leaf(comment));
        InsertOutcome::Inserted
    }

    /// Append a reply under `parent`. A parent that is itself a reply
    /// flattens the new comment under the nearest top-level ancestor.
    pub fn insert_reply(&mut self, parent: CommentId, comment: Comment) -> ReplyInsert {
        if self.contains(comment.id) {
            return ReplyInsert::AlreadyPresent;
        }
        let anchor = match self.find(parent) {
            Some((Placement::TopLevel { .. }, _)) => parent,
            Some((Placement::Reply { parent: top, .. }, _)) => top,
            None => return ReplyInsert::ParentNotFound(comment),
        };
        let node = self
            .top
            .iter_mut()
            .find(|n| n.id() == anchor)
            .expect("anchor comment found but not top-level");
        node.replies.push(CommentNode::leaf(comment));
        node.reply_count += 1;
        ReplyInsert::Inserted
    }

    /// Remove a comment and its reply subtree. Unknown ids are a "not
    /// found" result, never an error: local and remote deletions race.
    pub fn remove(&mut self, id: CommentId) -> Option<RemovedComment> {
        if let Some(i) = self.top.iter().position(|n| n.id() == id) {
            return Some(RemovedComment {
                node: self.top.remove(i),
                placement: Placement::TopLevel { index: i },
            });
        }
        for node in self.top.iter_mut() {
            if let Some(j) = node.replies.iter().position(|r| r.id() == id) {
                let removed = node.replies.remove(j);
                node.reply_count = node.reply_count.saturating_sub(1);
                return Some(RemovedComment {
                    node: removed,
                    placement: Placement::Reply {
                        parent: node.id(),
                        index: j,
                    },
                });
            }
        }
        None
    }

    /// Replace a comment's fields in place, wherever it is found
    pub fn update(&mut self, comment: Comment) -> bool {
        for node in self.top.iter_mut() {
            if node.id() == comment.id {
                node.comment = comment;
                return true;
            }
            for reply in node.replies.iter_mut() {
                if reply.id() == comment.id {
                    reply.comment = comment;
                    return true;
                }
            }
        }
        false
    }

    /// Put a removed subtree back where it came from. Indices are clamped
    /// and a vanished parent falls back to top-level, so a rollback cannot
    /// fail outright.
    pub fn reinsert(&mut self, removed: RemovedComment) {
        match removed.placement {
            Placement::TopLevel { index } => {
                let index = index.min(self.top.len());
                self.top.insert(index, removed.node);
            }
            Placement::Reply { parent, index } => {
                match self.top.iter_mut().find(|n| n.id() == parent) {
                    Some(node) => {
                        let index = index.min(node.replies.len());
                        node.replies.insert(index, removed.node);
                        node.reply_count += 1;
                    }
                    None => {
                        tracing::warn!(
                            reply = ?removed.node.id(),
                            ?parent,
                            "reinserting reply whose parent is gone, keeping it top-level"
                        );
                        self.top.insert(0, removed.node);
                    }
                }
            }
        }
    }

    /// Clamp every `reply_count` back onto `replies.len()`, returning the
    /// number of nodes that needed fixing
    pub fn repair_reply_counts(&mut self) -> usize {
        let mut fixed = 0;
        for node in self.top.iter_mut() {
            let want = node.replies.len() as u32;
            if node.reply_count != want {
                node.reply_count = want;
                fixed += 1;
            }
        }
        fixed
    }
}
