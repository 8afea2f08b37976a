//! Graph emission.
//!
//! Walks live blocks in reverse postorder with one [`ValueFrame`] per
//! block. Every edge carries the frame at the end of its source block to
//! the target: through `LoopExit` nodes for each loop it leaves, then into
//! the target's pending join. Reverse postorder guarantees that all
//! forward edges of a block arrive before it is visited; back edges arrive
//! afterwards and are wired into the already-built `LoopBegin`.
//!
//! Loop headers join in up to two generations. Forward entries are joined
//! by a plain `Merge` only when there is more than one of them, and back
//! entries likewise only when there is more than one. A try block entering
//! a catch handler counts once per throw site. The header's
//! `LoopBegin` then selects between the forward frame (input 0) and the
//! back frame (input 1), with a `ValueSelector` for every slot that is live
//! at the header and assigned somewhere in the loop.
//!
//! Throwing instructions inside a try range feed the catch handler with
//! the frame as it was before the instruction, controlled by the
//! instruction's `IfException` projection.

use esj_bytecode::{BytecodeInfo, BytecodeKind, Input, Method, Opcode};
use esj_circuit::{ConstValue, NodeId, Op};
use smallvec::SmallVec;

use crate::block::{BlockGraph, BlockId};
use crate::cfg::BytecodeTable;
use crate::error::BuildError;
use crate::frame::{LoopHeaderFrame, MergeFrame, NodeSink, Pending, ValueFrame};
use crate::liveness::{LiveSet, Liveness, SlotLayout};
use crate::loops::{LoopAnalysis, LoopId};
use crate::options::CompileOptions;
use crate::profile::TypeRecorder;

pub(crate) struct Emitter<'a> {
    sink: NodeSink,
    method: &'a Method,
    blocks: &'a BlockGraph,
    table: &'a BytecodeTable,
    loops: &'a LoopAnalysis,
    liveness: &'a mut Liveness,
    profile: &'a dyn TypeRecorder,
    options: CompileOptions,
    layout: SlotLayout,
    pending: Vec<Pending>,
    headers: Vec<Option<LoopHeaderFrame>>,
}

impl<'a> Emitter<'a> {
    pub(crate) fn new(
        method: &'a Method,
        blocks: &'a BlockGraph,
        table: &'a BytecodeTable,
        loops: &'a LoopAnalysis,
        liveness: &'a mut Liveness,
        profile: &'a dyn TypeRecorder,
        options: CompileOptions,
    ) -> Self {
        let layout = liveness.layout();
        Emitter {
            sink: NodeSink::new(table.len() as usize),
            method,
            blocks,
            table,
            loops,
            liveness,
            profile,
            options,
            layout,
            pending: (0..blocks.len()).map(|_| Pending::Empty).collect(),
            headers: (0..blocks.len()).map(|_| None).collect(),
        }
    }

    /// Emit the whole method and verify the result.
    pub(crate) fn emit(mut self) -> Result<NodeSink, BuildError> {
        let entry = self.entry_frame();
        self.pending[BlockId::ENTRY.index()] = Pending::Single(entry);
        if let Some(header) = self.blocks.live().find(|b| b.osr_entry).map(|b| b.id) {
            self.enter_osr(header)?;
        }

        let loops = self.loops;
        for &id in loops.rpo() {
            self.visit(id)?;
        }

        if let Some(header) = self.headers.iter().flatten().find(|h| {
            h.back_merge
                .as_ref()
                .is_some_and(|merge| !merge.is_complete())
        }) {
            return Err(BuildError::Internal(format!(
                "loop begin {} is missing back edges",
                header.loop_begin
            )));
        }

        self.sink.graph.verify()?;
        tracing::debug!(
            nodes = self.sink.graph.len(),
            merges = self.sink.graph.count(|op| op == Op::Merge),
            loops = self.sink.graph.count(|op| op == Op::LoopBegin),
            selectors = self.sink.graph.count(|op| op == Op::ValueSelector),
            "emitted graph"
        );
        tracing::trace!("graph:\n{}", self.sink.graph);
        Ok(self.sink)
    }

    // ── Entries ─────────────────────────────────────────────────────

    /// Frame at method entry: arguments in their registers, everything
    /// else undefined, and the incoming lexical environment.
    fn entry_frame(&mut self) -> ValueFrame {
        let entry = BlockId::ENTRY;
        let state = self.sink.graph.state_entry();
        let depend = self.sink.graph.depend_entry();
        let undefined = self.sink.graph.constant(ConstValue::Undefined);

        let mut frame = ValueFrame::new(self.layout.len(), state, depend);
        frame.slots.fill(undefined);
        for index in 0..self.method.num_args {
            if let Some(reg) = self.method.arg_register(index) {
                let arg = self.sink.add(entry, Op::Arg { index }, &[], &[], &[]);
                frame.set(self.layout.vreg(reg), arg);
            }
        }
        let env = self.sink.add(entry, Op::LexicalEnv, &[], &[], &[]);
        frame.set(self.layout.env(), env);
        frame
    }

    /// Add the OSR entry as an extra forward entry of `header`. Live slots
    /// are reloaded from the interpreter frame.
    fn enter_osr(&mut self, header: BlockId) -> Result<(), BuildError> {
        let state = self.sink.graph.state_entry();
        let depend = self.sink.graph.depend_entry();
        let osr = self.sink.add(header, Op::OsrEntry, &[state], &[depend], &[]);
        let undefined = self.sink.graph.constant(ConstValue::Undefined);

        let mut frame = ValueFrame::new(self.layout.len(), osr, osr);
        frame.slots.fill(undefined);
        let live: Vec<usize> = self.liveness.live_in(header).iter().collect();
        for slot in live {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "slot count is bounded by the u16 register count"
            )]
            let value = self.sink.add(
                header,
                Op::OsrValue { slot: slot as u32 },
                &[osr],
                &[],
                &[],
            );
            frame.set(slot, value);
        }
        tracing::debug!(%header, "added OSR entry");
        self.join_forward(header, frame)
    }

    // ── Blocks ──────────────────────────────────────────────────────

    fn visit(&mut self, id: BlockId) -> Result<(), BuildError> {
        let blocks = self.blocks;
        let block = blocks.block(id);
        let mut frame = self.take_pending(id)?;
        if block.is_loop_header() {
            frame = self.begin_loop(id, frame)?;
        }
        if block.is_catch {
            let exception = self.sink.add(
                id,
                Op::GetException,
                &[frame.state],
                &[frame.depend],
                &[],
            );
            frame.set(self.layout.acc(), exception);
            frame.depend = exception;
        }

        let live_before = self
            .liveness
            .instruction_live_in(self.blocks, self.table, id)
            .to_vec();
        for (bc, live) in block.bytecodes.clone().zip(&live_before) {
            self.sink.current_bc = Some(bc);
            let result = self.emit_instruction(id, bc, live, &mut frame);
            self.sink.current_bc = None;
            result?;
        }
        self.leave(id, frame)
    }

    /// The frame entering `id`, once all its forward entries are in.
    fn take_pending(&mut self, id: BlockId) -> Result<ValueFrame, BuildError> {
        match self.pending[id.index()].take() {
            Pending::Single(frame) => Ok(frame),
            Pending::Merge(merge) if merge.is_complete() => Ok(merge.finish()),
            Pending::Merge(_) => Err(BuildError::Internal(format!(
                "{id} visited before all its forward entries"
            ))),
            Pending::Empty => Err(BuildError::Internal(format!("{id} has no entry frame"))),
        }
    }

    /// Build the `LoopBegin` of header `id` and its selectors.
    fn begin_loop(&mut self, id: BlockId, forward: ValueFrame) -> Result<ValueFrame, BuildError> {
        let (blocks, loops) = (self.blocks, self.loops);
        let Some(loop_id) = loops.loop_headed_by(blocks, id) else {
            return Err(BuildError::Internal(format!("{id} is not a loop header")));
        };
        let info = loops.loop_info(loop_id);

        let mut selected = LiveSet::new(self.layout.len());
        for slot in self.liveness.live_in(id).iter() {
            if info.assigns(slot) {
                selected.insert(slot);
            }
        }

        let loop_begin = self.sink.add(
            id,
            Op::LoopBegin,
            &[forward.state, NodeId::NONE],
            &[],
            &[],
        );
        let back_entries = blocks.back_entries(id);
        let back_merge = if back_entries > 1 {
            let merge = MergeFrame::new(&mut self.sink, id, back_entries, selected.clone());
            self.sink
                .graph
                .set_state_input(loop_begin, 1, merge.join());
            Some(merge)
        } else {
            None
        };
        let depend_selector = self.sink.add(
            id,
            Op::DependSelector,
            &[loop_begin],
            &[forward.depend, NodeId::NONE],
            &[],
        );

        let mut frame = forward.clone().with_control(loop_begin, depend_selector);
        let mut selectors = vec![None; self.layout.len()];
        for slot in selected.iter() {
            let selector = self.sink.add(
                id,
                Op::ValueSelector,
                &[loop_begin],
                &[],
                &[forward.get(slot), NodeId::NONE],
            );
            frame.set(slot, selector);
            selectors[slot] = Some(selector);
        }

        tracing::trace!(
            header = %id,
            loop_id = %loop_id,
            selectors = selected.count(),
            back_entries,
            "loop begin"
        );
        self.headers[id.index()] = Some(LoopHeaderFrame {
            loop_begin,
            depend_selector,
            selectors,
            back_merge,
        });
        Ok(frame)
    }

    /// Send the frame at the end of `id` along its outgoing edges.
    fn leave(&mut self, id: BlockId, frame: ValueFrame) -> Result<(), BuildError> {
        let (blocks, table) = (self.blocks, self.table);
        let block = blocks.block(id);
        let last = block.last_bytecode().map(|bc| (bc, table.get(bc)));

        match last {
            Some((_, info)) if matches!(info.kind, BytecodeKind::Return | BytecodeKind::Throw) => {
                Ok(())
            }
            Some((bc, info)) if info.kind == BytecodeKind::ConditionalJump => {
                let Some((fallthrough, taken)) = block.branch_targets() else {
                    return self.follow(id, &block.succs, &frame);
                };
                let condition = frame.read(self.layout.acc(), bc)?;
                let jump_if = matches!(info.opcode, Opcode::Jnez | Opcode::Jnez16);
                self.sink.current_bc = Some(bc);
                let branch = self.sink.add(
                    id,
                    Op::IfBranch { jump_if },
                    &[frame.state],
                    &[],
                    &[condition],
                );
                let if_true = self.sink.add(id, Op::IfTrue, &[branch], &[], &[]);
                let if_false = self.sink.add(id, Op::IfFalse, &[branch], &[], &[]);
                self.sink.current_bc = None;

                let depend = frame.depend;
                let mut taken_frame = frame.clone();
                taken_frame.state = if_true;
                self.contribute(id, taken, taken_frame)?;
                self.contribute(id, fallthrough, frame.with_control(if_false, depend))
            }
            _ => self.follow(id, &block.succs, &frame),
        }
    }

    fn follow(&mut self, id: BlockId, succs: &[BlockId], frame: &ValueFrame) -> Result<(), BuildError> {
        for &succ in succs {
            self.contribute(id, succ, frame.clone())?;
        }
        Ok(())
    }

    // ── Edges ───────────────────────────────────────────────────────

    /// Carry `frame` along the edge `from -> to`.
    fn contribute(
        &mut self,
        from: BlockId,
        to: BlockId,
        mut frame: ValueFrame,
    ) -> Result<(), BuildError> {
        let (blocks, loops) = (self.blocks, self.loops);
        for loop_id in loops.loops_exited(blocks, from, to) {
            self.exit_loop(from, to, loop_id, &mut frame);
        }

        let target = blocks.block(to);
        if target.loop_backs.contains(&from) {
            let back = self
                .sink
                .add(from, Op::LoopBack, &[frame.state], &[], &[]);
            frame.state = back;
            let Some(header) = self.headers[to.index()].as_mut() else {
                return Err(BuildError::Internal(format!(
                    "back edge {from} -> {to} reached an unvisited header"
                )));
            };
            return header.add_back_edge(&mut self.sink, &frame);
        }
        if target.is_loop_header() {
            return self.join_forward(to, frame);
        }
        let arity = target.num_state_preds as usize;
        self.join(to, arity, frame)
    }

    /// Leave `loop_id` on the edge `from -> to`.
    fn exit_loop(&mut self, from: BlockId, to: BlockId, loop_id: LoopId, frame: &mut ValueFrame) {
        let loops = self.loops;
        let info = loops.loop_info(loop_id);
        let exit = self
            .sink
            .add(from, Op::LoopExit, &[frame.state], &[], &[]);
        let depend = self
            .sink
            .add(from, Op::LoopExitDepend, &[exit], &[frame.depend], &[]);
        let live: Vec<usize> = self.liveness.live_in(to).iter().collect();
        for slot in live {
            let value = frame.get(slot);
            if info.assigns(slot) && !value.is_none() {
                let wrapped = self
                    .sink
                    .add(from, Op::LoopExitValue, &[exit], &[], &[value]);
                frame.set(slot, wrapped);
            }
        }
        frame.state = exit;
        frame.depend = depend;
    }

    /// A forward entry of loop header `to`.
    fn join_forward(&mut self, to: BlockId, frame: ValueFrame) -> Result<(), BuildError> {
        let blocks = self.blocks;
        let arity = blocks.forward_entries(to);
        self.join(to, arity, frame)
    }

    fn join(&mut self, to: BlockId, arity: usize, frame: ValueFrame) -> Result<(), BuildError> {
        let slot = &mut self.pending[to.index()];
        *slot = match slot.take() {
            Pending::Empty if arity <= 1 => Pending::Single(frame),
            Pending::Empty => {
                let live = self.liveness.live_in(to).clone();
                let mut merge = MergeFrame::new(&mut self.sink, to, arity, live);
                merge.add_input(&mut self.sink, &frame)?;
                Pending::Merge(merge)
            }
            Pending::Merge(mut merge) => {
                merge.add_input(&mut self.sink, &frame)?;
                Pending::Merge(merge)
            }
            Pending::Single(_) => {
                return Err(BuildError::Internal(format!(
                    "{to} expects one entry but received several"
                )));
            }
        };
        Ok(())
    }

    // ── Instructions ────────────────────────────────────────────────

    fn emit_instruction(
        &mut self,
        id: BlockId,
        bc: u32,
        live: &LiveSet,
        frame: &mut ValueFrame,
    ) -> Result<(), BuildError> {
        let table = self.table;
        let info = table.get(bc);
        let acc = self.layout.acc();
        match info.kind {
            BytecodeKind::Discarded | BytecodeKind::Jump | BytecodeKind::ConditionalJump => {}
            BytecodeKind::SetConstant => {
                let value = self.sink.graph.constant(constant_of(info));
                frame.set(acc, value);
            }
            BytecodeKind::Mov => {
                let source = info.vreg_inputs().next().map_or(acc, usize::from);
                let target = info.vreg_out.map_or(acc, usize::from);
                let value = frame.read(source, bc)?;
                frame.set(target, value);
            }
            BytecodeKind::Return => {
                let value = if info.reads_acc() {
                    frame.read(acc, bc)?
                } else {
                    self.sink.graph.constant(ConstValue::Undefined)
                };
                let op = if self.options.is_inline() {
                    Op::InlineReturn
                } else {
                    Op::Return
                };
                let ret = self
                    .sink
                    .add(id, op, &[frame.state], &[frame.depend], &[value]);
                frame.state = ret;
            }
            BytecodeKind::General
            | BytecodeKind::Accessor
            | BytecodeKind::Call
            | BytecodeKind::Throw
            | BytecodeKind::Suspend
            | BytecodeKind::Resume => self.emit_general(id, bc, info, live, frame)?,
        }
        Ok(())
    }

    fn emit_general(
        &mut self,
        id: BlockId,
        bc: u32,
        info: &BytecodeInfo,
        live: &LiveSet,
        frame: &mut ValueFrame,
    ) -> Result<(), BuildError> {
        let template = self.table.template(bc).copied().ok_or_else(|| {
            BuildError::Internal(format!("bytecode {bc} has no node template"))
        })?;
        let mut values: SmallVec<[NodeId; 4]> = SmallVec::new();
        for input in &info.inputs {
            let value = match *input {
                Input::VReg(reg) => frame.read(self.layout.vreg(reg), bc)?,
                Input::Imm(imm) => self.sink.graph.constant(ConstValue::Imm(imm)),
                Input::ConstId(id) => self.sink.graph.constant(ConstValue::PoolId(id)),
            };
            values.push(value);
        }
        if info.reads_acc() {
            values.push(frame.read(self.layout.acc(), bc)?);
        }
        if info.reads_env() {
            values.push(frame.read(self.layout.env(), bc)?);
        }
        debug_assert_eq!(
            values.len(),
            template.value_inputs,
            "value inputs of {} at bytecode {bc}",
            info.opcode
        );

        let catch = self
            .blocks
            .block(id)
            .catch()
            .filter(|_| template.can_throw());
        let before = catch.map(|_| frame.clone());

        let node = self.sink.add(
            id,
            Op::JsBytecode {
                opcode: info.opcode,
                bc_index: bc,
            },
            &[frame.state],
            &[frame.depend],
            &values,
        );
        if template.needs_frame_state() {
            let frame_state = self.frame_state(id, bc, live, frame)?;
            self.sink.graph.set_frame_state(node, frame_state);
        }
        if self.options.type_lowering {
            if let Some(hint) = self.profile.hint_at(bc) {
                self.sink.graph.set_hint(node, hint);
            }
        }
        frame.state = node;
        frame.depend = node;

        if let (Some(catch), Some(before)) = (catch, before) {
            if info.kind != BytecodeKind::Throw {
                frame.state = self.sink.add(id, Op::IfSuccess, &[node], &[], &[]);
            }
            let exception = self.sink.add(id, Op::IfException, &[node], &[], &[]);
            self.contribute(id, catch, before.with_control(exception, node))?;
        }

        if template.writes_acc {
            frame.set(self.layout.acc(), node);
        }
        if let Some(reg) = info.vreg_out.filter(|_| template.vreg_outputs > 0) {
            frame.set(self.layout.vreg(reg), node);
        }
        if template.writes_env() {
            frame.set(self.layout.env(), node);
        }
        Ok(())
    }

    /// Snapshot of the slots live before `bc`. Dead slots read as the
    /// shared `OptimizedOut` node.
    fn frame_state(
        &mut self,
        id: BlockId,
        bc: u32,
        live: &LiveSet,
        frame: &ValueFrame,
    ) -> Result<NodeId, BuildError> {
        let optimized_out = self.sink.graph.optimized_out();
        let mut values = Vec::with_capacity(self.layout.len());
        for slot in 0..self.layout.len() {
            if live.contains(slot) {
                values.push(frame.read(slot, bc)?);
            } else {
                values.push(optimized_out);
            }
        }
        Ok(self
            .sink
            .add(id, Op::FrameState { bc_index: bc }, &[], &[], &values))
    }
}

/// Constant loaded by a set-constant instruction.
fn constant_of(info: &BytecodeInfo) -> ConstValue {
    let imm = info.inputs.iter().find_map(|input| match input {
        Input::Imm(imm) => Some(*imm),
        _ => None,
    });
    match (info.opcode, imm) {
        (Opcode::LdNull, _) => ConstValue::Null,
        (Opcode::LdTrue, _) => ConstValue::Bool(true),
        (Opcode::LdFalse, _) => ConstValue::Bool(false),
        (Opcode::Ldai, Some(imm)) => {
            i32::try_from(imm).map_or(ConstValue::Imm(imm), ConstValue::Int)
        }
        (Opcode::Fldai, Some(imm)) => ConstValue::Double(u64::from_ne_bytes(imm.to_ne_bytes())),
        _ => ConstValue::Undefined,
    }
}
