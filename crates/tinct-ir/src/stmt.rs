//! Statements: operations with side effects and control flow.

use crate::arena::Handle;
use crate::expr::Expression;
use crate::func::LocalVariable;

/// A block of statements.
pub type Block = Vec<Statement>;

/// Bitflags for the memory affected by a control barrier.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct Barrier(u32);

impl Barrier {
    /// `workgroupBarrier()`.
    pub const WORKGROUP: Self = Self(1);
    /// `storageBarrier()`.
    pub const STORAGE: Self = Self(2);
    /// `textureBarrier()`.
    pub const TEXTURE: Self = Self(4);

    /// Returns `true` if `self` contains all flags in `other`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Barrier {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A `case` selector of a switch statement.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum CaseSelector {
    I32(i32),
    U32(u32),
    Default,
}

/// One clause of a switch statement.
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchCase {
    pub selectors: Vec<CaseSelector>,
    pub body: Block,
}

/// A statement in the IR.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// Introduces a `var` or `let` local. `let`s always have an initializer.
    Declare {
        local: Handle<LocalVariable>,
        init: Option<Expression>,
    },
    /// Writes a value through a pointer.
    Store {
        pointer: Expression,
        value: Expression,
    },
    /// Evaluates a call, builtin or texture store for its effects.
    Call(Expression),
    If {
        condition: Expression,
        accept: Block,
        reject: Block,
    },
    /// Unified loop construct; `for` and `while` lower to this.
    Loop {
        body: Block,
        continuing: Block,
        /// `break if` at the end of `continuing`.
        break_if: Option<Expression>,
    },
    Switch {
        selector: Expression,
        cases: Vec<SwitchCase>,
    },
    Break,
    Continue,
    Return {
        value: Option<Expression>,
    },
    /// Fragment `discard`.
    Discard,
    /// A control barrier with memory semantics.
    Barrier(Barrier),
    Block(Block),
}

impl Statement {
    /// `*pointer = value`.
    pub fn store(pointer: Expression, value: Expression) -> Self {
        Self::Store { pointer, value }
    }

    /// Calls `f` on each expression directly owned by this statement
    /// (not those of nested blocks).
    pub fn for_each_expr(&self, mut f: impl FnMut(&Expression)) {
        match self {
            Self::Declare { init, .. } => init.iter().for_each(f),
            Self::Store { pointer, value } => {
                f(pointer);
                f(value);
            }
            Self::Call(e) | Self::If { condition: e, .. } | Self::Switch { selector: e, .. } => {
                f(e)
            }
            Self::Loop { break_if, .. } => break_if.iter().for_each(f),
            Self::Return { value } => value.iter().for_each(f),
            Self::Break
            | Self::Continue
            | Self::Discard
            | Self::Barrier(_)
            | Self::Block(_) => {}
        }
    }

    /// Mutable counterpart of [`Self::for_each_expr`].
    pub fn for_each_expr_mut(&mut self, mut f: impl FnMut(&mut Expression)) {
        match self {
            Self::Declare { init, .. } => init.iter_mut().for_each(f),
            Self::Store { pointer, value } => {
                f(pointer);
                f(value);
            }
            Self::Call(e) | Self::If { condition: e, .. } | Self::Switch { selector: e, .. } => {
                f(e)
            }
            Self::Loop { break_if, .. } => break_if.iter_mut().for_each(f),
            Self::Return { value } => value.iter_mut().for_each(f),
            Self::Break
            | Self::Continue
            | Self::Discard
            | Self::Barrier(_)
            | Self::Block(_) => {}
        }
    }

    /// Calls `f` on each nested block.
    pub fn for_each_block(&self, mut f: impl FnMut(&Block)) {
        match self {
            Self::If { accept, reject, .. } => {
                f(accept);
                f(reject);
            }
            Self::Loop {
                body, continuing, ..
            } => {
                f(body);
                f(continuing);
            }
            Self::Switch { cases, .. } => cases.iter().for_each(|c| f(&c.body)),
            Self::Block(b) => f(b),
            _ => {}
        }
    }

    /// Calls `f` on each nested block, mutably.
    pub fn for_each_block_mut(&mut self, mut f: impl FnMut(&mut Block)) {
        match self {
            Self::If { accept, reject, .. } => {
                f(accept);
                f(reject);
            }
            Self::Loop {
                body, continuing, ..
            } => {
                f(body);
                f(continuing);
            }
            Self::Switch { cases, .. } => cases.iter_mut().for_each(|c| f(&mut c.body)),
            Self::Block(b) => f(b),
            _ => {}
        }
    }
}

/// Visits every expression tree root in `block` and nested blocks, in
/// program order.
pub fn walk_exprs(block: &Block, f: &mut dyn FnMut(&Expression)) {
    for stmt in block {
        stmt.for_each_expr(&mut *f);
        stmt.for_each_block(|b| walk_exprs(b, f));
    }
}

/// Visits every expression tree root in `block` and nested blocks, mutably.
pub fn walk_exprs_mut(block: &mut Block, f: &mut dyn FnMut(&mut Expression)) {
    for stmt in block {
        stmt.for_each_expr_mut(&mut *f);
        stmt.for_each_block_mut(|b| walk_exprs_mut(b, f));
    }
}

/// Visits every expression node (roots and descendants), pre-order.
pub fn walk_all_exprs(block: &Block, f: &mut dyn FnMut(&Expression)) {
    walk_exprs(block, &mut |root| root.visit(f));
}

/// Rewrites every expression node bottom-up.
pub fn rewrite_all_exprs(block: &mut Block, f: &mut dyn FnMut(&mut Expression)) {
    walk_exprs_mut(block, &mut |root| root.visit_mut_post(f));
}

/// Visits every statement in `block` and nested blocks, pre-order.
pub fn walk_stmts(block: &Block, f: &mut dyn FnMut(&Statement)) {
    for stmt in block {
        f(stmt);
        stmt.for_each_block(|b| walk_stmts(b, f));
    }
}

/// Rebuilds each block bottom-up: nested blocks are rewritten before `f`
/// sees the block that contains them.
pub fn rewrite_blocks(block: &mut Block, f: &mut dyn FnMut(&mut Block)) {
    for stmt in block.iter_mut() {
        stmt.for_each_block_mut(|b| rewrite_blocks(b, f));
    }
    f(block);
}

/// Returns `true` if the block ends in a statement that never falls
/// through.
pub fn is_terminated(block: &Block) -> bool {
    matches!(
        block.last(),
        Some(
            Statement::Break | Statement::Continue | Statement::Return { .. } | Statement::Discard
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinaryOp, Literal};

    fn sample_block() -> Block {
        vec![
            Statement::Call(Expression::u32(1)),
            Statement::If {
                condition: Expression::bool(true),
                accept: vec![Statement::Return {
                    value: Some(Expression::u32(2)),
                }],
                reject: vec![],
            },
            Statement::Loop {
                body: vec![Statement::Break],
                continuing: vec![],
                break_if: Some(Expression::bool(false)),
            },
        ]
    }

    #[test]
    fn walk_exprs_visits_roots_in_order() {
        let mut roots = Vec::new();
        walk_exprs(&sample_block(), &mut |e| roots.push(e.clone()));
        assert_eq!(
            roots,
            vec![
                Expression::u32(1),
                Expression::bool(true),
                Expression::u32(2),
                Expression::bool(false)
            ]
        );
    }

    #[test]
    fn rewrite_all_exprs_reaches_nested_blocks() {
        let mut block = sample_block();
        rewrite_all_exprs(&mut block, &mut |e| {
            if let Expression::Literal(Literal::U32(v)) = e {
                *e = Expression::binary(BinaryOp::Add, Expression::u32(*v), Expression::u32(0));
            }
        });
        let mut adds = 0;
        walk_all_exprs(&block, &mut |e| {
            if matches!(e, Expression::Binary { .. }) {
                adds += 1;
            }
        });
        assert_eq!(adds, 2);
    }

    #[test]
    fn rewrite_blocks_is_bottom_up() {
        let mut block = sample_block();
        let mut sizes = Vec::new();
        rewrite_blocks(&mut block, &mut |b| sizes.push(b.len()));
        // accept, reject, loop body, continuing, then the outer block
        assert_eq!(sizes, vec![1, 0, 1, 0, 3]);
    }

    #[test]
    fn termination() {
        assert!(is_terminated(&vec![Statement::Discard]));
        assert!(!is_terminated(&vec![Statement::Barrier(Barrier::WORKGROUP)]));
        assert!(!is_terminated(&vec![]));
    }
}
