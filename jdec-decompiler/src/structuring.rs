//! Turn the interpreted CFG into nested structured statements.
//!
//! Blocks are emitted in offset order by a recursive range walker. Loops
//! are classified from back edges into dominators, conditionals from the
//! branch terminator (with short-circuit chains folded into one condition),
//! switches from the switch terminator, and try regions from the exception
//! structurer's output. Jumps that match an enclosing loop or switch become
//! break/continue; anything else becomes a synthesized goto, which is a
//! first-class statement, not an error. When a back edge targets a block
//! that does not dominate its source the flow is irreducible and the whole
//! method drops to the flat label/goto lowering, so every label stays
//! anchored. The count of synthesized gotos is reported so the driver can
//! record a diagnostic.

use std::collections::{BTreeMap, BTreeSet};

use jdec_classfile::JvmType;
use jdec_ir::cfg::{BlockId, Cfg, EdgeKind};
use jdec_ir::expr::{Constant, ExprArena, ExprId, ExprKind, OnNan};
use jdec_ir::stmt::{CatchClause, Label, Stmt, SwitchCase};

use crate::exceptions::TryRegion;
use crate::interp::{BlockCode, Terminator};

/// Structured method body plus the number of goto-lowered jumps.
pub struct Structured {
    pub body: Vec<Stmt>,
    pub goto_count: usize,
}

pub fn structure_method(
    cfg: &Cfg,
    arena: &mut ExprArena,
    code: &[BlockCode],
    regions: &[TryRegion],
) -> Structured {
    if cfg.blocks.is_empty() {
        return Structured {
            body: vec![],
            goto_count: 0,
        };
    }

    let idom = dominators(cfg);
    let loop_headers = find_loop_headers(cfg, &idom);
    let preds = preds_with_handlers(cfg);
    let mut loop_bodies = BTreeMap::new();
    for &h in &loop_headers {
        loop_bodies.insert(h, natural_loop(cfg, &idom, h, &preds));
    }
    let irreducible = count_irreducible_edges(cfg, &idom);

    let mut ctx = StructCtx {
        cfg,
        arena,
        code,
        regions,
        region_used: vec![false; regions.len()],
        loop_headers,
        loop_bodies,
        active_loops: BTreeSet::new(),
        elided: mark_elided(cfg, regions),
        visited: vec![false; cfg.blocks.len()],
        deferred: vec![false; cfg.blocks.len()],
        frames: Vec::new(),
        block_labels: BTreeMap::new(),
        next_label: 0,
        goto_count: 0,
        catch_counter: 0,
    };

    let mut body = Vec::new();
    if irreducible == 0 {
        emit_block_range(&mut ctx, &mut body, cfg.entry, None);
    }
    sweep_unvisited(&mut ctx, &mut body);
    Structured {
        body,
        goto_count: ctx.goto_count,
    }
}

/// Enclosing construct a jump may resolve against.
enum Frame {
    Loop {
        /// Jumping here is a `continue`: the header for top-tested loops,
        /// the latch for bottom-tested ones.
        continue_at: BlockId,
        follow: Option<BlockId>,
        label: Option<Label>,
        label_used: bool,
    },
    Switch {
        follow: BlockId,
        label: Option<Label>,
        label_used: bool,
    },
    /// Offset-bounded emission (a try body or a then branch). The first
    /// jump past the bound nominates the join the construct continues at.
    Bounded {
        end_offset: u32,
        join: Option<BlockId>,
    },
}

/// How one jump edge was resolved.
enum Jump {
    /// Keep walking at the target.
    Walk,
    /// The target is the join of an enclosing construct; fall out.
    Stop,
    /// Emit this statement and stop the chain.
    Emit(Stmt),
}

struct StructCtx<'a> {
    cfg: &'a Cfg,
    arena: &'a mut ExprArena,
    code: &'a [BlockCode],
    regions: &'a [TryRegion],
    region_used: Vec<bool>,
    loop_headers: BTreeSet<BlockId>,
    loop_bodies: BTreeMap<BlockId, BTreeSet<BlockId>>,
    /// Headers whose loop statement is being emitted right now; they must
    /// not re-trigger loop classification from inside their own body.
    active_loops: BTreeSet<BlockId>,
    /// Blocks inside an inlined-finally duplicate; structure is kept but
    /// statements are dropped.
    elided: Vec<bool>,
    visited: Vec<bool>,
    /// Blocks left to the flat sweep so their goto labels stay anchored.
    deferred: Vec<bool>,
    frames: Vec<Frame>,
    block_labels: BTreeMap<BlockId, Label>,
    next_label: u32,
    goto_count: usize,
    catch_counter: u32,
}

impl StructCtx<'_> {
    fn fresh_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    fn label_for_block(&mut self, b: BlockId) -> Label {
        if let Some(&l) = self.block_labels.get(&b) {
            return l;
        }
        let l = self.fresh_label();
        self.block_labels.insert(b, l);
        l
    }

    fn stmts_of(&self, b: BlockId) -> Vec<Stmt> {
        if self.elided[b] {
            Vec::new()
        } else {
            self.code[b].stmts.clone()
        }
    }

    /// Fallthrough and branch successors of a conditional block.
    fn cond_succs(&self, b: BlockId) -> Option<(BlockId, BlockId)> {
        let succs = &self.cfg.blocks[b].succs;
        let ft = succs
            .iter()
            .find(|e| e.kind == EdgeKind::FallThrough)?
            .target;
        let tgt = succs
            .iter()
            .find(|e| e.kind == EdgeKind::CondBranch)?
            .target;
        Some((ft, tgt))
    }

    /// Resolve a jump to `target` against enclosing frames. Exact matches
    /// on a loop or switch win over the bounded-range check: a break out
    /// of a try is still a break, with the finally implied by the source.
    fn resolve_jump(&mut self, target: BlockId) -> Jump {
        if let Some(s) = self.exact_match(target) {
            return Jump::Emit(s);
        }

        for i in (0..self.frames.len()).rev() {
            if let Frame::Bounded { end_offset, join } = &self.frames[i] {
                if self.cfg.blocks[target].start >= *end_offset {
                    match *join {
                        None => {
                            if let Frame::Bounded { join, .. } = &mut self.frames[i] {
                                *join = Some(target);
                            }
                            return Jump::Stop;
                        }
                        Some(j) if j == target => return Jump::Stop,
                        Some(_) => return Jump::Emit(self.goto_to(target)),
                    }
                }
                // Inside the innermost bound; nothing outer applies.
                break;
            }
        }

        if self.deferred[target] || self.visited[target] {
            Jump::Emit(self.goto_to(target))
        } else {
            Jump::Walk
        }
    }

    fn goto_to(&mut self, target: BlockId) -> Stmt {
        self.goto_count += 1;
        if !self.visited[target] {
            self.deferred[target] = true;
        }
        let l = self.label_for_block(target);
        Stmt::Goto(l)
    }

    /// Break/continue when `target` is exactly a loop or switch boundary.
    fn exact_match(&mut self, target: BlockId) -> Option<Stmt> {
        let innermost_loop = self
            .frames
            .iter()
            .rposition(|f| matches!(f, Frame::Loop { .. }));
        let innermost_breakable = self
            .frames
            .iter()
            .rposition(|f| matches!(f, Frame::Loop { .. } | Frame::Switch { .. }));

        for i in (0..self.frames.len()).rev() {
            match &self.frames[i] {
                Frame::Loop {
                    continue_at,
                    follow,
                    ..
                } => {
                    if *continue_at == target {
                        let lbl = if Some(i) == innermost_loop {
                            None
                        } else {
                            Some(self.use_frame_label(i))
                        };
                        return Some(Stmt::Continue(lbl));
                    }
                    if *follow == Some(target) {
                        let lbl = if Some(i) == innermost_breakable {
                            None
                        } else {
                            Some(self.use_frame_label(i))
                        };
                        return Some(Stmt::Break(lbl));
                    }
                }
                Frame::Switch { follow, .. } => {
                    if *follow == target {
                        let lbl = if Some(i) == innermost_breakable {
                            None
                        } else {
                            Some(self.use_frame_label(i))
                        };
                        return Some(Stmt::Break(lbl));
                    }
                }
                Frame::Bounded { .. } => {}
            }
        }
        None
    }

    /// Whether `resolve_jump` would produce a statement, without assigning
    /// labels or nominating joins. Used to recognize `if (cond) break;`
    /// shapes before committing to if/else structuring.
    fn would_emit(&self, target: BlockId) -> bool {
        for f in self.frames.iter().rev() {
            match f {
                Frame::Loop {
                    continue_at,
                    follow,
                    ..
                } => {
                    if *continue_at == target || *follow == Some(target) {
                        return true;
                    }
                }
                Frame::Switch { follow, .. } => {
                    if *follow == target {
                        return true;
                    }
                }
                Frame::Bounded { .. } => {}
            }
        }
        self.deferred[target] || self.visited[target]
    }

    fn use_frame_label(&mut self, i: usize) -> Label {
        let fresh = self.fresh_label();
        match &mut self.frames[i] {
            Frame::Loop {
                label, label_used, ..
            }
            | Frame::Switch {
                label, label_used, ..
            } => {
                *label_used = true;
                *label.get_or_insert(fresh)
            }
            Frame::Bounded { .. } => fresh,
        }
    }

    /// Walking (not jumping) past the innermost bound: nominate the block
    /// as the join, or defer it when the construct already has one.
    fn walk_hits_bound(&mut self, current: BlockId) -> Option<Option<Stmt>> {
        for i in (0..self.frames.len()).rev() {
            if let Frame::Bounded { end_offset, join } = &self.frames[i] {
                if self.cfg.blocks[current].start < *end_offset {
                    return None;
                }
                match *join {
                    None => {
                        if let Frame::Bounded { join, .. } = &mut self.frames[i] {
                            *join = Some(current);
                        }
                        return Some(None);
                    }
                    Some(j) if j == current => return Some(None),
                    Some(_) => return Some(Some(self.goto_to(current))),
                }
            }
        }
        None
    }

    /// Negate a boolean condition, pushing the negation inward.
    fn negate(&mut self, id: ExprId) -> ExprId {
        let ty = self.arena.ty(id).clone();
        match self.arena.node(id).kind.clone() {
            ExprKind::Compare {
                op,
                on_nan,
                lhs,
                rhs,
            } => self.arena.push(
                ExprKind::Compare {
                    op: op.negate(),
                    on_nan: on_nan.map(|n| match n {
                        OnNan::IsTrue => OnNan::IsFalse,
                        OnNan::IsFalse => OnNan::IsTrue,
                    }),
                    lhs,
                    rhs,
                },
                ty,
            ),
            ExprKind::Not(inner) => inner,
            ExprKind::And(a, b) => {
                let na = self.negate(a);
                let nb = self.negate(b);
                self.arena.push(ExprKind::Or(na, nb), ty)
            }
            ExprKind::Or(a, b) => {
                let na = self.negate(a);
                let nb = self.negate(b);
                self.arena.push(ExprKind::And(na, nb), ty)
            }
            _ => self.arena.push(ExprKind::Not(id), ty),
        }
    }
}

// ---- analyses -----------------------------------------------------------

/// Immediate dominators, iterative over reverse postorder. A virtual root
/// (id `n`) edges into the entry. Handler edges participate as ordinary
/// edges, so a handler is dominated by the head of its protected range and
/// a normal jump from catch code back to a loop header stays a natural back
/// edge. They still never *count* as back edges themselves: reducibility is
/// judged on the non-exceptional edges only.
fn dominators(cfg: &Cfg) -> Vec<Option<BlockId>> {
    let n = cfg.blocks.len();
    let vroot = n;
    let succs = succs_with_handlers(cfg);

    let succs_of = |v: BlockId| -> Vec<BlockId> {
        if v == vroot {
            vec![cfg.entry]
        } else {
            succs[v].clone()
        }
    };

    let mut rpo = Vec::with_capacity(n + 1);
    let mut seen = vec![false; n + 1];
    let mut stack = vec![(vroot, 0usize)];
    seen[vroot] = true;
    while let Some(&mut (b, ref mut i)) = stack.last_mut() {
        let succs = succs_of(b);
        if *i < succs.len() {
            let s = succs[*i];
            *i += 1;
            if !seen[s] {
                seen[s] = true;
                stack.push((s, 0));
            }
        } else {
            rpo.push(b);
            stack.pop();
        }
    }
    rpo.reverse();
    let mut order = vec![usize::MAX; n + 1];
    for (i, &b) in rpo.iter().enumerate() {
        order[b] = i;
    }

    let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); n + 1];
    for v in 0..n {
        for &s in &succs[v] {
            if !preds[s].contains(&v) {
                preds[s].push(v);
            }
        }
    }
    preds[cfg.entry].push(vroot);

    let mut idom: Vec<Option<BlockId>> = vec![None; n + 1];
    idom[vroot] = Some(vroot);
    let mut changed = true;
    while changed {
        changed = false;
        for &b in rpo.iter().skip(1) {
            let mut new: Option<BlockId> = None;
            for &p in &preds[b] {
                if idom[p].is_none() {
                    continue;
                }
                new = Some(match new {
                    None => p,
                    Some(cur) => intersect(&idom, &order, cur, p),
                });
            }
            if new.is_some() && new != idom[b] {
                idom[b] = new;
                changed = true;
            }
        }
    }
    idom.truncate(n);
    idom
}

fn intersect(idom: &[Option<BlockId>], order: &[usize], mut a: BlockId, mut b: BlockId) -> BlockId {
    while a != b {
        while order[a] > order[b] {
            match idom[a] {
                Some(p) if p != a => a = p,
                _ => return b,
            }
        }
        while order[b] > order[a] {
            match idom[b] {
                Some(p) if p != b => b = p,
                _ => return a,
            }
        }
    }
    a
}

fn dominates(idom: &[Option<BlockId>], a: BlockId, mut b: BlockId) -> bool {
    loop {
        if a == b {
            return true;
        }
        match idom.get(b).copied().flatten() {
            Some(p) if p != b => b = p,
            _ => return false,
        }
    }
}

/// Targets of back edges into a dominator, i.e. natural-loop headers.
fn find_loop_headers(cfg: &Cfg, idom: &[Option<BlockId>]) -> BTreeSet<BlockId> {
    let mut headers = BTreeSet::new();
    for block in &cfg.blocks {
        for succ in cfg.succ_ids(block.id) {
            if dominates(idom, succ, block.id) {
                headers.insert(succ);
            }
        }
    }
    headers
}

/// Backward edges whose target does not dominate the source: jumps into
/// the middle of another construct, which no loop statement can express.
fn count_irreducible_edges(cfg: &Cfg, idom: &[Option<BlockId>]) -> usize {
    let mut count = 0;
    for block in &cfg.blocks {
        for succ in cfg.succ_ids(block.id) {
            if cfg.blocks[succ].start <= block.start && !dominates(idom, succ, block.id) {
                count += 1;
            }
        }
    }
    count
}

/// Normal successors plus handler edges, deduplicated. Handler edges make
/// catch code reachable from the region it covers, which both the dominator
/// computation and the natural-loop closure rely on.
fn succs_with_handlers(cfg: &Cfg) -> Vec<Vec<BlockId>> {
    let mut succs: Vec<Vec<BlockId>> = vec![Vec::new(); cfg.blocks.len()];
    for v in 0..cfg.blocks.len() {
        for s in cfg.succ_ids(v) {
            if !succs[v].contains(&s) {
                succs[v].push(s);
            }
        }
    }
    for e in &cfg.handler_edges {
        if !succs[e.from].contains(&e.handler) {
            succs[e.from].push(e.handler);
        }
    }
    succs
}

fn preds_with_handlers(cfg: &Cfg) -> Vec<Vec<BlockId>> {
    let succs = succs_with_handlers(cfg);
    let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); cfg.blocks.len()];
    for (v, ss) in succs.iter().enumerate() {
        for &s in ss {
            if !preds[s].contains(&v) {
                preds[s].push(v);
            }
        }
    }
    preds
}

/// Blocks of the natural loop of `header`: everything that reaches a back
/// edge source without passing through the header.
fn natural_loop(
    cfg: &Cfg,
    idom: &[Option<BlockId>],
    header: BlockId,
    preds: &[Vec<BlockId>],
) -> BTreeSet<BlockId> {
    let mut body = BTreeSet::new();
    body.insert(header);
    let mut work: Vec<BlockId> = cfg.blocks[header]
        .preds
        .iter()
        .copied()
        .filter(|&p| dominates(idom, header, p))
        .collect();
    while let Some(b) = work.pop() {
        if b != header && body.insert(b) {
            work.extend(preds[b].iter().copied());
        }
    }
    body
}

/// Blocks whose statements belong to an inlined finally duplicate.
fn mark_elided(cfg: &Cfg, regions: &[TryRegion]) -> Vec<bool> {
    let mut elided = vec![false; cfg.blocks.len()];
    for region in regions {
        let Some(f) = &region.finally else { continue };
        for &(start, end) in &f.inlined {
            for block in &cfg.blocks {
                if block.start >= start && block.start < end {
                    elided[block.id] = true;
                }
            }
        }
    }
    elided
}

// ---- emission -----------------------------------------------------------

fn emit_block_range(
    ctx: &mut StructCtx,
    result: &mut Vec<Stmt>,
    start: BlockId,
    stop_before: Option<BlockId>,
) {
    let mut current = start;
    loop {
        if current >= ctx.cfg.blocks.len()
            || ctx.visited[current]
            || Some(current) == stop_before
            || !ctx.code[current].reached
        {
            break;
        }
        if ctx.deferred[current] {
            let s = ctx.goto_to(current);
            result.push(s);
            break;
        }
        if let Some(stop) = ctx.walk_hits_bound(current) {
            if let Some(s) = stop {
                result.push(s);
            }
            break;
        }
        let block_start = ctx.cfg.blocks[current].start;

        let pending_region = ctx
            .regions
            .iter()
            .enumerate()
            .find(|(i, r)| r.start_pc == block_start && !ctx.region_used[*i])
            .map(|(i, _)| i);
        if let Some(ri) = pending_region {
            let join = emit_try(ctx, result, current, ri);
            let next = join
                .filter(|&j| !ctx.visited[j] && !ctx.deferred[j])
                .or_else(|| next_unvisited(ctx, current));
            match next {
                Some(next) if Some(next) != stop_before => {
                    current = next;
                    continue;
                }
                _ => break,
            }
        }

        if ctx.loop_headers.contains(&current) && !ctx.active_loops.contains(&current) {
            emit_loop(ctx, result, current);
            match next_unvisited(ctx, current) {
                Some(next) if Some(next) != stop_before => {
                    current = next;
                    continue;
                }
                _ => break,
            }
        }

        ctx.visited[current] = true;
        result.extend(ctx.stmts_of(current));

        match ctx.code[current].terminator.clone() {
            Terminator::Return(v) => {
                result.push(Stmt::Return(v));
                break;
            }
            Terminator::Throw(v) => {
                result.push(Stmt::Throw(v));
                break;
            }
            Terminator::FallThrough | Terminator::Goto => {
                let Some(next) = ctx.cfg.succ_ids(current).next() else {
                    break;
                };
                match ctx.resolve_jump(next) {
                    Jump::Emit(s) => {
                        result.push(s);
                        break;
                    }
                    Jump::Stop => break,
                    Jump::Walk => {
                        if Some(next) == stop_before {
                            break;
                        }
                        current = next;
                    }
                }
            }
            Terminator::If { cond } => {
                if !emit_if(ctx, result, current, cond, stop_before, &mut current) {
                    break;
                }
            }
            Terminator::Switch { key } => match emit_switch(ctx, result, current, key) {
                Some(next) if Some(next) != stop_before && !ctx.visited[next] => {
                    current = next;
                }
                _ => break,
            },
        }
    }
}

/// Offset-ordered sweep for a continuation point after a self-contained
/// construct. Handler entries are reached through their try statements.
fn next_unvisited(ctx: &StructCtx, after: BlockId) -> Option<BlockId> {
    (after + 1..ctx.cfg.blocks.len()).find(|&i| {
        !ctx.visited[i] && !ctx.deferred[i] && ctx.code[i].reached && !ctx.cfg.blocks[i].is_handler
    })
}

/// Emit a conditional. Returns true when the caller should continue the
/// chain at the updated `current`.
fn emit_if(
    ctx: &mut StructCtx,
    result: &mut Vec<Stmt>,
    block: BlockId,
    cond: ExprId,
    stop_before: Option<BlockId>,
    current: &mut BlockId,
) -> bool {
    let Some((ft, tgt)) = ctx.cond_succs(block) else {
        return false;
    };
    if ft == tgt {
        // Degenerate two-way branch to one place.
        *current = ft;
        return !ctx.visited[ft] && Some(ft) != stop_before;
    }

    // `if (cond) continue/break/goto` against an enclosing construct or an
    // already-emitted block.
    if ctx.would_emit(tgt) {
        if let Jump::Emit(s) = ctx.resolve_jump(tgt) {
            result.push(Stmt::If {
                cond,
                then_body: vec![s],
                else_body: vec![],
            });
        }
        *current = ft;
        return !ctx.visited[ft] && Some(ft) != stop_before;
    }

    // Short-circuit chains: fold condition-only blocks into one condition.
    // `then_cond` is the condition under which the then body (starting on
    // the fallthrough side) runs.
    let mut then_cond = ctx.negate(cond);
    let mut then_start = ft;
    let mut else_target = tgt;
    loop {
        if ctx.visited[then_start]
            || ctx.deferred[then_start]
            || ctx.elided[then_start]
            || ctx.loop_headers.contains(&then_start)
            || !ctx.code[then_start].stmts.is_empty()
        {
            break;
        }
        let Terminator::If { cond: c2 } = ctx.code[then_start].terminator else {
            break;
        };
        let Some((f2, t2)) = ctx.cond_succs(then_start) else {
            break;
        };
        if t2 == else_target {
            let nc = ctx.negate(c2);
            let ty = ctx.arena.ty(then_cond).clone();
            then_cond = ctx.arena.push(ExprKind::And(then_cond, nc), ty);
            ctx.visited[then_start] = true;
            then_start = f2;
        } else if f2 == else_target {
            let ty = ctx.arena.ty(then_cond).clone();
            then_cond = ctx.arena.push(ExprKind::And(then_cond, c2), ty);
            ctx.visited[then_start] = true;
            then_start = t2;
        } else {
            break;
        }
    }

    if ctx.visited[then_start] {
        // The whole fallthrough side collapsed into the condition chain.
        *current = else_target;
        return !ctx.visited[else_target] && Some(else_target) != stop_before;
    }

    // Fast path: the then block flows straight to the branch target.
    let then_block = &ctx.cfg.blocks[then_start];
    if then_block.succs.len() == 1 && then_block.succs[0].target == else_target {
        let mut then_body = Vec::new();
        emit_block_range(ctx, &mut then_body, then_start, Some(else_target));
        result.push(Stmt::If {
            cond: then_cond,
            then_body,
            else_body: vec![],
        });
        *current = else_target;
        return !ctx.visited[else_target] && Some(else_target) != stop_before;
    }

    // General shape: bound the then branch by the else block's offset; the
    // first jump past it nominates the join.
    ctx.frames.push(Frame::Bounded {
        end_offset: ctx.cfg.blocks[else_target].start,
        join: None,
    });
    let mut then_body = Vec::new();
    emit_block_range(ctx, &mut then_body, then_start, Some(else_target));
    let join = match ctx.frames.pop() {
        Some(Frame::Bounded { join, .. }) => join,
        _ => None,
    };

    match join {
        Some(j) if j != else_target => {
            let mut else_body = Vec::new();
            emit_block_range(ctx, &mut else_body, else_target, Some(j));
            result.push(Stmt::If {
                cond: then_cond,
                then_body,
                else_body,
            });
            *current = j;
            !ctx.visited[j] && Some(j) != stop_before
        }
        _ => {
            // No distinct join: the then branch returned, threw, or fell
            // into the branch target.
            result.push(Stmt::If {
                cond: then_cond,
                then_body,
                else_body: vec![],
            });
            *current = else_target;
            !ctx.visited[else_target] && Some(else_target) != stop_before
        }
    }
}

fn emit_loop(ctx: &mut StructCtx, result: &mut Vec<Stmt>, header: BlockId) {
    let body_set = ctx.loop_bodies.get(&header).cloned().unwrap_or_default();

    // while (cond): the header is a pure test with one edge leaving the loop.
    if ctx.code[header].stmts.is_empty() {
        if let (Terminator::If { cond }, Some((ft, tgt))) =
            (ctx.code[header].terminator.clone(), ctx.cond_succs(header))
        {
            let ft_in = body_set.contains(&ft);
            let tgt_in = body_set.contains(&tgt);
            if ft_in != tgt_in {
                let (body_start, follow, loop_cond) = if ft_in {
                    let c = ctx.negate(cond);
                    (ft, tgt, c)
                } else {
                    (tgt, ft, cond)
                };
                ctx.visited[header] = true;
                ctx.frames.push(Frame::Loop {
                    continue_at: header,
                    follow: Some(follow),
                    label: None,
                    label_used: false,
                });
                let mut body = Vec::new();
                emit_block_range(ctx, &mut body, body_start, Some(header));
                trim_trailing_continue(&mut body);
                let label = pop_frame_label(ctx);
                result.push(Stmt::While {
                    label,
                    cond: loop_cond,
                    body,
                });
                return;
            }
        }
    }

    // do { .. } while (cond): a single latch holds the only exit test and
    // the header itself does not test. A self-loop is its own latch.
    let latches: Vec<BlockId> = ctx.cfg.blocks[header]
        .preds
        .iter()
        .copied()
        .filter(|p| body_set.contains(p))
        .collect();
    if let [latch] = latches[..] {
        if let (Terminator::If { cond }, Some((ft, tgt))) =
            (ctx.code[latch].terminator.clone(), ctx.cond_succs(latch))
        {
            let tests_header = (ft == header) != (tgt == header);
            let header_is_test =
                latch != header && matches!(ctx.code[header].terminator, Terminator::If { .. });
            if tests_header && !header_is_test {
                let (follow, loop_cond) = if tgt == header {
                    (ft, cond)
                } else {
                    let c = ctx.negate(cond);
                    (tgt, c)
                };
                ctx.active_loops.insert(header);
                ctx.frames.push(Frame::Loop {
                    continue_at: latch,
                    follow: Some(follow),
                    label: None,
                    label_used: false,
                });
                let mut body = Vec::new();
                emit_block_range(ctx, &mut body, header, Some(latch));
                ctx.visited[latch] = true;
                body.extend(ctx.stmts_of(latch));
                let label = pop_frame_label(ctx);
                ctx.active_loops.remove(&header);
                result.push(Stmt::DoWhile {
                    label,
                    body,
                    cond: loop_cond,
                });
                return;
            }
        }
    }

    // General shape: while (true) with breaks at the exits.
    let follow = loop_follow(ctx, &body_set);
    ctx.active_loops.insert(header);
    ctx.frames.push(Frame::Loop {
        continue_at: header,
        follow,
        label: None,
        label_used: false,
    });
    let mut body = Vec::new();
    emit_block_range(ctx, &mut body, header, None);
    trim_trailing_continue(&mut body);
    let label = pop_frame_label(ctx);
    ctx.active_loops.remove(&header);
    let cond = ctx
        .arena
        .push(ExprKind::Const(Constant::Int(1)), JvmType::Boolean);
    result.push(Stmt::While { label, cond, body });
}

/// Earliest block outside the loop that an in-loop edge targets.
fn loop_follow(ctx: &StructCtx, body: &BTreeSet<BlockId>) -> Option<BlockId> {
    let mut follow: Option<BlockId> = None;
    for &b in body {
        for s in ctx.cfg.succ_ids(b) {
            if !body.contains(&s) {
                follow = Some(match follow {
                    None => s,
                    Some(f) if ctx.cfg.blocks[s].start < ctx.cfg.blocks[f].start => s,
                    Some(f) => f,
                });
            }
        }
    }
    follow
}

fn pop_frame_label(ctx: &mut StructCtx) -> Option<Label> {
    match ctx.frames.pop() {
        Some(Frame::Loop {
            label, label_used, ..
        })
        | Some(Frame::Switch {
            label, label_used, ..
        }) => label.filter(|_| label_used),
        _ => None,
    }
}

fn trim_trailing_continue(body: &mut Vec<Stmt>) {
    if matches!(body.last(), Some(Stmt::Continue(None))) {
        body.pop();
    }
}

/// Emit a switch; returns the follow block to continue at.
fn emit_switch(
    ctx: &mut StructCtx,
    result: &mut Vec<Stmt>,
    block: BlockId,
    key: ExprId,
) -> Option<BlockId> {
    let succs = ctx.cfg.blocks[block].succs.clone();
    let mut default_target = None;
    let mut by_target: BTreeMap<BlockId, Vec<i32>> = BTreeMap::new();
    let mut case_order: Vec<BlockId> = Vec::new();
    for e in &succs {
        match e.kind {
            EdgeKind::SwitchCase(Some(k)) => {
                if !by_target.contains_key(&e.target) {
                    case_order.push(e.target);
                }
                by_target.entry(e.target).or_default().push(k);
            }
            EdgeKind::SwitchCase(None) => default_target = Some(e.target),
            _ => {}
        }
    }
    let default_target = default_target?;

    // The join is the highest-offset target; javac places the code after
    // the switch there (usually the default).
    let follow = succs
        .iter()
        .map(|e| e.target)
        .max_by_key(|&t| ctx.cfg.blocks[t].start)
        .unwrap_or(default_target);

    // Bodies in offset order so fallthrough reads top to bottom.
    case_order.sort_by_key(|&t| ctx.cfg.blocks[t].start);

    ctx.frames.push(Frame::Switch {
        follow,
        label: None,
        label_used: false,
    });

    let mut cases = Vec::new();
    for (i, &target) in case_order.iter().enumerate() {
        let keys = by_target[&target].clone();
        if target == follow {
            // Case lands directly on the join: empty body, explicit break.
            cases.push(SwitchCase {
                keys,
                body: vec![Stmt::Break(None)],
                falls_through: false,
            });
            continue;
        }
        let next_case = case_order.get(i + 1).copied().filter(|&n| n != follow);
        let stop = next_case.or(Some(follow));
        let mut body = Vec::new();
        emit_block_range(ctx, &mut body, target, stop);
        let falls_through = !matches!(
            body.last(),
            Some(
                Stmt::Break(_)
                    | Stmt::Continue(_)
                    | Stmt::Return(_)
                    | Stmt::Throw(_)
                    | Stmt::Goto(_)
            )
        );
        cases.push(SwitchCase {
            keys,
            body,
            falls_through,
        });
    }

    let default = if default_target == follow || ctx.visited[default_target] {
        Vec::new()
    } else {
        let mut body = Vec::new();
        emit_block_range(ctx, &mut body, default_target, Some(follow));
        body
    };

    let label = pop_frame_label(ctx);
    result.push(Stmt::Switch {
        label,
        key,
        cases,
        default,
    });
    Some(follow)
}

/// Emit one try statement; returns the join block to continue at.
fn emit_try(
    ctx: &mut StructCtx,
    result: &mut Vec<Stmt>,
    start: BlockId,
    region_idx: usize,
) -> Option<BlockId> {
    ctx.region_used[region_idx] = true;
    let region = ctx.regions[region_idx].clone();

    ctx.frames.push(Frame::Bounded {
        end_offset: region.end_pc,
        join: None,
    });
    let mut try_body = Vec::new();
    emit_block_range(ctx, &mut try_body, start, None);
    let join = match ctx.frames.pop() {
        Some(Frame::Bounded { join, .. }) => join,
        _ => None,
    };

    let mut catches = Vec::new();
    for arm in &region.catches {
        let Some(h) = ctx.cfg.block_starting_at(arm.handler_pc) else {
            continue;
        };
        if ctx.visited[h] || !ctx.code[h].reached {
            continue;
        }
        let (binding, strip) = catch_binding(ctx, h);
        let mut body = Vec::new();
        emit_block_range(ctx, &mut body, h, join);
        if strip && !body.is_empty() {
            body.remove(0);
        }
        catches.push(CatchClause {
            class: arm.class.clone(),
            binding,
            body,
        });
    }

    let mut finally = Vec::new();
    if let Some(f) = &region.finally {
        if let Some(h) = ctx.cfg.block_starting_at(f.handler_pc) {
            if !ctx.visited[h] && ctx.code[h].reached {
                let (_, strip) = catch_binding(ctx, h);
                emit_block_range(ctx, &mut finally, h, None);
                if strip && !finally.is_empty() {
                    finally.remove(0);
                }
                // The handler's re-raise of the parked exception is implied
                // by the finally statement itself.
                if matches!(finally.last(), Some(Stmt::Throw(_))) {
                    finally.pop();
                }
            }
        }
    }

    result.push(Stmt::Try {
        body: try_body,
        catches,
        finally,
    });
    join
}

/// Catch binding name: reuse the handler's own `astore` variable when its
/// first statement parks the caught value, otherwise synthesize one.
fn catch_binding(ctx: &mut StructCtx, handler: BlockId) -> (String, bool) {
    if let Some(Stmt::Store { name, value, .. }) = ctx.code[handler].stmts.first() {
        if matches!(ctx.arena.node(*value).kind, ExprKind::CaughtException) {
            return (name.clone(), true);
        }
    }
    let n = ctx.catch_counter;
    ctx.catch_counter += 1;
    (format!("e{n}"), false)
}

/// Flat label/goto lowering for every block the structured walk did not
/// reach, in offset order. Also the whole-method rendering for irreducible
/// flow, where it guarantees every goto label has an anchor.
fn sweep_unvisited(ctx: &mut StructCtx, result: &mut Vec<Stmt>) {
    for b in 0..ctx.cfg.blocks.len() {
        if ctx.visited[b] || !ctx.code[b].reached {
            continue;
        }
        ctx.visited[b] = true;
        let label = ctx.label_for_block(b);
        result.push(Stmt::GotoTarget(label));
        result.extend(ctx.stmts_of(b));
        match ctx.code[b].terminator.clone() {
            Terminator::Return(v) => result.push(Stmt::Return(v)),
            Terminator::Throw(v) => result.push(Stmt::Throw(v)),
            Terminator::Goto | Terminator::FallThrough => {
                if let Some(next) = ctx.cfg.succ_ids(b).next() {
                    let l = ctx.label_for_block(next);
                    ctx.goto_count += 1;
                    result.push(Stmt::Goto(l));
                }
            }
            Terminator::If { cond } => {
                if let Some((ft, tgt)) = ctx.cond_succs(b) {
                    let lt = ctx.label_for_block(tgt);
                    let lf = ctx.label_for_block(ft);
                    ctx.goto_count += 2;
                    result.push(Stmt::If {
                        cond,
                        then_body: vec![Stmt::Goto(lt)],
                        else_body: vec![],
                    });
                    result.push(Stmt::Goto(lf));
                }
            }
            Terminator::Switch { key } => {
                let succs = ctx.cfg.blocks[b].succs.clone();
                let mut cases = Vec::new();
                let mut default = Vec::new();
                for e in &succs {
                    let l = ctx.label_for_block(e.target);
                    ctx.goto_count += 1;
                    match e.kind {
                        EdgeKind::SwitchCase(Some(k)) => cases.push(SwitchCase {
                            keys: vec![k],
                            body: vec![Stmt::Goto(l)],
                            falls_through: false,
                        }),
                        EdgeKind::SwitchCase(None) => default.push(Stmt::Goto(l)),
                        _ => {}
                    }
                }
                result.push(Stmt::Switch {
                    label: None,
                    key,
                    cases,
                    default,
                });
            }
        }
    }
}
