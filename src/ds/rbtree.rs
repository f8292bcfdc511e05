//! Intrusive red-black tree.
//!
//! The node is embedded inside the client record, and client records live
//! in fixed pools, so links are pool indices rather than pointers. The
//! toolkit reaches nodes through [`RbPool`]. Position selection belongs
//! to the caller, which knows its key: a caller performs the plain BST
//! descent, links the new node `Red`, and then hands over to
//! [`RbRoot::insert_fixup`] for rebalancing.
//!
//! Invariants, with `NIL` playing the role of the null link:
//! * the root is black,
//! * a red node has only black children,
//! * every path from the root to `NIL` crosses the same number of black
//!   nodes,
//! * a node's parent link is `NIL` iff it is the root.

/// The null link.
pub const NIL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

/// Embedded tree link block.
#[derive(Debug, Clone, Copy)]
pub struct RbNode {
    pub parent: u32,
    pub left: u32,
    pub right: u32,
    pub color: Color,
}

impl RbNode {
    pub const fn new() -> Self {
        Self {
            parent: NIL,
            left: NIL,
            right: NIL,
            color: Color::Black,
        }
    }

    /// Detaches the link block from any tree state.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl Default for RbNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves indices to embedded nodes. Implemented by the pool that owns
/// the client records.
pub trait RbPool {
    fn rb(&self, id: u32) -> &RbNode;
    fn rb_mut(&mut self, id: u32) -> &mut RbNode;
}

fn is_red<P: RbPool>(pool: &P, n: u32) -> bool {
    n != NIL && pool.rb(n).color == Color::Red
}

fn is_black<P: RbPool>(pool: &P, n: u32) -> bool {
    !is_red(pool, n)
}

fn color_of<P: RbPool>(pool: &P, n: u32) -> Color {
    if n == NIL {
        Color::Black
    } else {
        pool.rb(n).color
    }
}

/// Root of one tree. Client structs embed this next to their pool.
#[derive(Debug, Clone, Copy)]
pub struct RbRoot {
    pub node: u32,
}

impl RbRoot {
    pub const fn new() -> Self {
        Self { node: NIL }
    }

    pub fn is_empty(&self) -> bool {
        self.node == NIL
    }

    fn rotate_left<P: RbPool>(&mut self, pool: &mut P, n: u32) {
        let right = pool.rb(n).right;
        let parent = pool.rb(n).parent;

        let rl = pool.rb(right).left;
        pool.rb_mut(n).right = rl;
        if rl != NIL {
            pool.rb_mut(rl).parent = n;
        }

        pool.rb_mut(right).left = n;
        pool.rb_mut(right).parent = parent;

        if parent != NIL {
            if pool.rb(parent).left == n {
                pool.rb_mut(parent).left = right;
            } else {
                pool.rb_mut(parent).right = right;
            }
        } else {
            self.node = right;
        }
        pool.rb_mut(n).parent = right;
    }

    fn rotate_right<P: RbPool>(&mut self, pool: &mut P, n: u32) {
        let left = pool.rb(n).left;
        let parent = pool.rb(n).parent;

        let lr = pool.rb(left).right;
        pool.rb_mut(n).left = lr;
        if lr != NIL {
            pool.rb_mut(lr).parent = n;
        }

        pool.rb_mut(left).right = n;
        pool.rb_mut(left).parent = parent;

        if parent != NIL {
            if pool.rb(parent).right == n {
                pool.rb_mut(parent).right = left;
            } else {
                pool.rb_mut(parent).left = left;
            }
        } else {
            self.node = left;
        }
        pool.rb_mut(n).parent = left;
    }

    /// Restores the colouring invariants after the caller linked `n` as a
    /// red leaf at its BST position.
    pub fn insert_fixup<P: RbPool>(&mut self, pool: &mut P, n: u32) {
        let mut n = n;
        loop {
            let mut parent = pool.rb(n).parent;
            if parent == NIL || !is_red(pool, parent) {
                break;
            }
            // A red parent is never the root, so the grandparent exists.
            let gparent = pool.rb(parent).parent;

            if parent == pool.rb(gparent).left {
                let uncle = pool.rb(gparent).right;
                if is_red(pool, uncle) {
                    // Red uncle: recolour and continue from the grandparent.
                    pool.rb_mut(uncle).color = Color::Black;
                    pool.rb_mut(parent).color = Color::Black;
                    pool.rb_mut(gparent).color = Color::Red;
                    n = gparent;
                    continue;
                }
                if pool.rb(parent).right == n {
                    // Inner side: rotate the parent to the outer side.
                    self.rotate_left(pool, parent);
                    core::mem::swap(&mut n, &mut parent);
                }
                pool.rb_mut(parent).color = Color::Black;
                pool.rb_mut(gparent).color = Color::Red;
                self.rotate_right(pool, gparent);
            } else {
                let uncle = pool.rb(gparent).left;
                if is_red(pool, uncle) {
                    pool.rb_mut(uncle).color = Color::Black;
                    pool.rb_mut(parent).color = Color::Black;
                    pool.rb_mut(gparent).color = Color::Red;
                    n = gparent;
                    continue;
                }
                if pool.rb(parent).left == n {
                    self.rotate_right(pool, parent);
                    core::mem::swap(&mut n, &mut parent);
                }
                pool.rb_mut(parent).color = Color::Black;
                pool.rb_mut(gparent).color = Color::Red;
                self.rotate_left(pool, gparent);
            }
        }

        if self.node != NIL {
            pool.rb_mut(self.node).color = Color::Black;
        }
    }

    /// Unlinks `n` from the tree and restores the invariants. The node's
    /// link block is left stale; callers reset it with [`RbNode::clear`].
    pub fn erase<P: RbPool>(&mut self, pool: &mut P, n: u32) {
        let child;
        let parent;
        let color;

        let left = pool.rb(n).left;
        let right = pool.rb(n).right;
        if left == NIL {
            child = right;
            parent = pool.rb(n).parent;
            color = color_of(pool, n);
            if child != NIL {
                pool.rb_mut(child).parent = parent;
            }
            if parent != NIL {
                if pool.rb(parent).left == n {
                    pool.rb_mut(parent).left = child;
                } else {
                    pool.rb_mut(parent).right = child;
                }
            } else {
                self.node = child;
            }
        } else if right == NIL {
            child = left;
            parent = pool.rb(n).parent;
            color = color_of(pool, n);
            if child != NIL {
                pool.rb_mut(child).parent = parent;
            }
            if parent != NIL {
                if pool.rb(parent).left == n {
                    pool.rb_mut(parent).left = child;
                } else {
                    pool.rb_mut(parent).right = child;
                }
            } else {
                self.node = child;
            }
        } else {
            // Two children: splice the in-order successor into n's slot,
            // taking over its colour, and remove the successor's old
            // position instead.
            let old = n;
            let mut succ = right;
            while pool.rb(succ).left != NIL {
                succ = pool.rb(succ).left;
            }

            child = pool.rb(succ).right;
            let mut par = pool.rb(succ).parent;
            color = color_of(pool, succ);

            if child != NIL {
                pool.rb_mut(child).parent = par;
            }
            if par != NIL {
                if pool.rb(par).left == succ {
                    pool.rb_mut(par).left = child;
                } else {
                    pool.rb_mut(par).right = child;
                }
            } else {
                self.node = child;
            }

            if pool.rb(succ).parent == old {
                par = succ;
            }

            // Read old's links only now: when the successor was old's
            // right child, the unlink above already redirected old.right.
            let old_node = *pool.rb(old);
            pool.rb_mut(succ).parent = old_node.parent;
            pool.rb_mut(succ).color = old_node.color;
            pool.rb_mut(succ).left = old_node.left;
            pool.rb_mut(succ).right = old_node.right;

            if old_node.parent != NIL {
                if pool.rb(old_node.parent).left == old {
                    pool.rb_mut(old_node.parent).left = succ;
                } else {
                    pool.rb_mut(old_node.parent).right = succ;
                }
            } else {
                self.node = succ;
            }

            pool.rb_mut(old_node.left).parent = succ;
            if old_node.right != NIL {
                pool.rb_mut(old_node.right).parent = succ;
            }

            parent = par;
        }

        if color == Color::Black {
            self.erase_fixup(pool, child, parent);
        }
    }

    /// Pushes the "double black" introduced by removing a black node up
    /// the tree until it is absorbed.
    fn erase_fixup<P: RbPool>(&mut self, pool: &mut P, n: u32, par: u32) {
        let mut node = n;
        let mut parent = par;

        while (node == NIL || is_black(pool, node)) && node != self.node {
            if pool.rb(parent).left == node {
                let mut sibling = pool.rb(parent).right;

                if is_red(pool, sibling) {
                    pool.rb_mut(sibling).color = Color::Black;
                    pool.rb_mut(parent).color = Color::Red;
                    self.rotate_left(pool, parent);
                    sibling = pool.rb(parent).right;
                }

                let sl = pool.rb(sibling).left;
                let sr = pool.rb(sibling).right;
                if is_black(pool, sl) && is_black(pool, sr) {
                    pool.rb_mut(sibling).color = Color::Red;
                    node = parent;
                    parent = pool.rb(node).parent;
                } else {
                    if is_black(pool, sr) {
                        pool.rb_mut(sl).color = Color::Black;
                        pool.rb_mut(sibling).color = Color::Red;
                        self.rotate_right(pool, sibling);
                        sibling = pool.rb(parent).right;
                    }
                    pool.rb_mut(sibling).color = color_of(pool, parent);
                    pool.rb_mut(parent).color = Color::Black;
                    let sr = pool.rb(sibling).right;
                    pool.rb_mut(sr).color = Color::Black;
                    self.rotate_left(pool, parent);
                    node = self.node;
                    break;
                }
            } else {
                let mut sibling = pool.rb(parent).left;

                if is_red(pool, sibling) {
                    pool.rb_mut(sibling).color = Color::Black;
                    pool.rb_mut(parent).color = Color::Red;
                    self.rotate_right(pool, parent);
                    sibling = pool.rb(parent).left;
                }

                let sl = pool.rb(sibling).left;
                let sr = pool.rb(sibling).right;
                if is_black(pool, sl) && is_black(pool, sr) {
                    pool.rb_mut(sibling).color = Color::Red;
                    node = parent;
                    parent = pool.rb(node).parent;
                } else {
                    if is_black(pool, sl) {
                        pool.rb_mut(sr).color = Color::Black;
                        pool.rb_mut(sibling).color = Color::Red;
                        self.rotate_left(pool, sibling);
                        sibling = pool.rb(parent).left;
                    }
                    pool.rb_mut(sibling).color = color_of(pool, parent);
                    pool.rb_mut(parent).color = Color::Black;
                    let sl = pool.rb(sibling).left;
                    pool.rb_mut(sl).color = Color::Black;
                    self.rotate_right(pool, parent);
                    node = self.node;
                    break;
                }
            }
        }

        if node != NIL {
            pool.rb_mut(node).color = Color::Black;
        }
    }

    /// Leftmost (minimum) node of the tree.
    pub fn first<P: RbPool>(&self, pool: &P) -> Option<u32> {
        if self.node == NIL {
            return None;
        }
        let mut n = self.node;
        while pool.rb(n).left != NIL {
            n = pool.rb(n).left;
        }
        Some(n)
    }

    /// In-order successor of `n`.
    pub fn next<P: RbPool>(pool: &P, n: u32) -> Option<u32> {
        if pool.rb(n).right != NIL {
            let mut succ = pool.rb(n).right;
            while pool.rb(succ).left != NIL {
                succ = pool.rb(succ).left;
            }
            return Some(succ);
        }

        let mut n = n;
        loop {
            let parent = pool.rb(n).parent;
            if parent == NIL {
                return None;
            }
            if pool.rb(parent).right != n {
                return Some(parent);
            }
            n = parent;
        }
    }
}
