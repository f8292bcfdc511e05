//! Completely fair scheduling.
//!
//! Each runnable task owns a scheduling entity whose key is its virtual
//! runtime: wall time scaled by 1024 over the task's weight. Entities
//! wait in a red-black tree ordered by that key, with a cached leftmost
//! link so picking the next task is O(1). A task runs until its virtual
//! runtime is more than one granularity ahead of the leftmost waiter,
//! which gives every task CPU time proportional to its weight.
//!
//! There is no hardware preemption here; the platform calls [`Cfs::tick`]
//! from its timer loop and performs the actual context switch when
//! `current` changes.

use super::{Pid, Task, TaskEntry, TaskState};
use crate::ds::rbtree::{RbNode, RbPool, RbRoot, NIL};
use crate::error::{KernelError, Result};
use crate::kprintln;
use crate::param::NTASK;

/// Weight of a nice-0 task; the unit of the virtual clock.
pub const NICE_0_LOAD: u32 = 1024;

/// Virtual-runtime lead, in nanoseconds, a task may build up before the
/// leftmost waiter preempts it.
pub const MIN_GRANULARITY: u64 = 1_000_000;

/// Period, in nanoseconds, within which every runnable task should get a
/// turn.
pub const TARGET_LATENCY: u64 = 6_000_000;

/// Nanoseconds the scheduler clock advances per reading.
const TICK_NS: u64 = 1_000_000;

/// Nice-to-weight table, one entry per nice level from -20 to 19. Each
/// step changes CPU share by about 25%.
static PRIO_TO_WEIGHT: [u32; 40] = [
    88761, 71755, 56483, 46273, 36291, // -20 .. -16
    29154, 23254, 18705, 14949, 11916, // -15 .. -11
    9548, 7620, 6100, 4904, 3906, // -10 .. -6
    3121, 2501, 1991, 1586, 1277, // -5 .. -1
    1024, 820, 655, 526, 423, // 0 .. 4
    335, 272, 215, 172, 137, // 5 .. 9
    110, 87, 70, 56, 45, // 10 .. 14
    36, 29, 23, 18, 15, // 15 .. 19
];

/// Weight for a nice level; out-of-range levels clamp to the endpoints.
pub fn nice_to_weight(nice: i32) -> u32 {
    let nice = nice.clamp(-20, 19);
    PRIO_TO_WEIGHT[(nice + 20) as usize]
}

/// Wall-clock delta scaled by the inverse of `weight`. The product is
/// taken in 128 bits, so any delta scales exactly.
pub fn calc_delta_fair(delta: u64, weight: u32) -> u64 {
    if weight != NICE_0_LOAD {
        (delta as u128 * NICE_0_LOAD as u128 / weight as u128) as u64
    } else {
        delta
    }
}

/// Per-task scheduling state.
#[derive(Clone, Copy)]
pub struct SchedEntity {
    pub run_node: RbNode,
    /// Nanoseconds of weighted runtime; the tree key.
    pub vruntime: u64,
    /// Clock value at the last accounting, 0 when not yet sampled.
    pub exec_start: u64,
    /// Unweighted nanoseconds this entity has run in total.
    pub sum_exec_runtime: u64,
    pub weight: u32,
    pub on_rq: bool,
}

impl SchedEntity {
    pub const fn new() -> Self {
        Self {
            run_node: RbNode::new(),
            vruntime: 0,
            exec_start: 0,
            sum_exec_runtime: 0,
            weight: NICE_0_LOAD,
            on_rq: false,
        }
    }
}

/// A task extended with its scheduling entity.
pub struct CfsTask {
    pub base: Task,
    pub se: SchedEntity,
    pub nice: i32,
}

impl CfsTask {
    pub const INIT: CfsTask = CfsTask {
        base: Task::INIT,
        se: SchedEntity::new(),
        nice: 0,
    };
}

impl RbPool for [CfsTask; NTASK] {
    fn rb(&self, id: u32) -> &RbNode {
        &self[id as usize].se.run_node
    }
    fn rb_mut(&mut self, id: u32) -> &mut RbNode {
        &mut self[id as usize].se.run_node
    }
}

/// The run queue.
pub struct CfsRq {
    pub tasks_timeline: RbRoot,
    /// Cached minimum-vruntime node of the timeline.
    pub leftmost: Option<u32>,
    /// Floor for newly created entities; never decreases.
    pub min_vruntime: u64,
    pub nr_running: u32,
    pub total_weight: u64,
}

impl CfsRq {
    pub const fn new() -> Self {
        Self {
            tasks_timeline: RbRoot::new(),
            leftmost: None,
            min_vruntime: 0,
            nr_running: 0,
            total_weight: 0,
        }
    }
}

/// The scheduler: the fixed task table, the run queue, and the running
/// task. The clock is internal and advances one millisecond per reading.
pub struct Cfs {
    tasks: [CfsTask; NTASK],
    rq: CfsRq,
    current: Option<u32>,
    clock: u64,
}

impl Cfs {
    pub const fn new() -> Self {
        Self {
            tasks: [CfsTask::INIT; NTASK],
            rq: CfsRq::new(),
            current: None,
            clock: 0,
        }
    }

    fn clock_ns(&mut self) -> u64 {
        self.clock += TICK_NS;
        self.clock
    }

    pub fn rq(&self) -> &CfsRq {
        &self.rq
    }

    pub fn current(&self) -> Option<u32> {
        self.current
    }

    pub fn task(&self, id: u32) -> &CfsTask {
        &self.tasks[id as usize]
    }

    /// Creates a task and puts it on the run queue. A new entity starts
    /// at `min_vruntime` so it cannot starve the queue from behind.
    pub fn create(&mut self, entry: TaskEntry, nice: i32) -> Result<Pid> {
        let slot = match self.tasks.iter().position(|t| t.base.state == TaskState::Unused) {
            Some(slot) => slot as u32,
            None => {
                kprintln!("cfs: no free task slots");
                return Err(KernelError::NoSlot);
            }
        };

        let task = &mut self.tasks[slot as usize];
        task.base.pid = slot as Pid;
        task.base.state = TaskState::Ready;
        task.base.frame = super::TrapFrame::zeroed();
        task.base.frame.ra = entry as usize;
        task.base.entry = Some(entry);
        task.nice = nice;
        task.se = SchedEntity {
            run_node: RbNode::new(),
            vruntime: self.rq.min_vruntime,
            exec_start: 0,
            sum_exec_runtime: 0,
            weight: nice_to_weight(nice),
            on_rq: false,
        };

        kprintln!(
            "cfs: created task {} (nice={}, weight={})",
            slot,
            nice,
            self.tasks[slot as usize].se.weight
        );
        self.enqueue(slot);
        Ok(slot as Pid)
    }

    /// Inserts the entity into the timeline by vruntime. No-op when it is
    /// already queued.
    pub fn enqueue(&mut self, id: u32) {
        if self.tasks[id as usize].se.on_rq {
            return;
        }

        let Cfs { tasks, rq, .. } = self;
        let vruntime = tasks[id as usize].se.vruntime;

        // BST descent: strictly smaller keys go left, ties go right. The
        // new node is the minimum iff every step went left.
        let mut link = rq.tasks_timeline.node;
        let mut parent = NIL;
        let mut went_left = false;
        let mut leftmost = true;
        while link != NIL {
            parent = link;
            if vruntime < tasks[link as usize].se.vruntime {
                link = tasks.rb(link).left;
                went_left = true;
            } else {
                link = tasks.rb(link).right;
                went_left = false;
                leftmost = false;
            }
        }

        if leftmost {
            rq.leftmost = Some(id);
        }

        *tasks.rb_mut(id) = RbNode {
            parent,
            left: NIL,
            right: NIL,
            color: crate::ds::rbtree::Color::Red,
        };
        if parent == NIL {
            rq.tasks_timeline.node = id;
        } else if went_left {
            tasks.rb_mut(parent).left = id;
        } else {
            tasks.rb_mut(parent).right = id;
        }
        rq.tasks_timeline.insert_fixup(tasks, id);

        let se = &mut tasks[id as usize].se;
        se.on_rq = true;
        rq.nr_running += 1;
        rq.total_weight += se.weight as u64;
        tasks[id as usize].base.state = TaskState::Ready;

        kprintln!(
            "cfs: enqueued task {} (vruntime={})",
            id,
            self.tasks[id as usize].se.vruntime
        );
    }

    /// Takes the entity off the timeline. No-op when it is not queued.
    pub fn dequeue(&mut self, id: u32) {
        if !self.tasks[id as usize].se.on_rq {
            return;
        }

        let Cfs { tasks, rq, .. } = self;

        if rq.leftmost == Some(id) {
            rq.leftmost = RbRoot::next(tasks, id);
        }
        rq.tasks_timeline.erase(tasks, id);
        tasks.rb_mut(id).clear();

        let se = &mut tasks[id as usize].se;
        se.on_rq = false;
        rq.nr_running -= 1;
        rq.total_weight -= se.weight as u64;

        self.update_min_vruntime();
        kprintln!("cfs: dequeued task {}", id);
    }

    /// The leftmost (smallest-vruntime) waiting entity.
    pub fn pick_next(&self) -> Option<u32> {
        self.rq.leftmost
    }

    fn update_min_vruntime(&mut self) {
        let mut vruntime = self.rq.min_vruntime;
        if let Some(cur) = self.current {
            vruntime = self.tasks[cur as usize].se.vruntime;
        }
        if let Some(left) = self.rq.leftmost {
            let leftmost = self.tasks[left as usize].se.vruntime;
            vruntime = if self.current.is_none() {
                leftmost
            } else {
                vruntime.min(leftmost)
            };
        }
        self.rq.min_vruntime = self.rq.min_vruntime.max(vruntime);
    }

    /// Charges the running task for the time since its last accounting.
    /// The first call after a switch only arms `exec_start`.
    pub fn update_curr(&mut self, id: u32) {
        let now = self.clock_ns();
        let se = &mut self.tasks[id as usize].se;
        if se.exec_start == 0 {
            se.exec_start = now;
            return;
        }

        let delta_exec = now - se.exec_start;
        se.exec_start = now;
        se.sum_exec_runtime += delta_exec;
        se.vruntime += calc_delta_fair(delta_exec, se.weight);

        self.update_min_vruntime();
    }

    /// Whether `cand` should take the CPU from `cur`: only when the
    /// running task has built up more than one granularity of virtual
    /// lead. A task that is still behind the candidate keeps running.
    pub fn check_preempt(&self, cur: u32, cand: u32) -> bool {
        let cur_vr = self.tasks[cur as usize].se.vruntime;
        let cand_vr = self.tasks[cand as usize].se.vruntime;
        cur_vr.saturating_sub(cand_vr) > MIN_GRANULARITY
    }

    /// The scheduler entry point, driven explicitly by the kernel loop.
    pub fn tick(&mut self) {
        let cur = match self.current {
            Some(cur) => cur,
            None => {
                if let Some(next) = self.pick_next() {
                    self.dequeue(next);
                    self.tasks[next as usize].base.state = TaskState::Running;
                    let now = self.clock_ns();
                    self.tasks[next as usize].se.exec_start = now;
                    self.current = Some(next);
                    kprintln!(
                        "cfs: scheduled task {} (vruntime={})",
                        next,
                        self.tasks[next as usize].se.vruntime
                    );
                }
                return;
            }
        };

        self.update_curr(cur);

        if let Some(next) = self.pick_next() {
            if self.check_preempt(cur, next) {
                kprintln!("cfs: preempting task {} with task {}", cur, next);
                self.tasks[cur as usize].base.state = TaskState::Ready;
                self.tasks[cur as usize].se.exec_start = 0;
                self.enqueue(cur);

                self.dequeue(next);
                self.tasks[next as usize].base.state = TaskState::Running;
                let now = self.clock_ns();
                self.tasks[next as usize].se.exec_start = now;
                self.current = Some(next);
            }
        }
    }

    /// Retires the running task; its slot becomes available again.
    pub fn exit_current(&mut self) {
        if let Some(cur) = self.current.take() {
            self.tasks[cur as usize].base.state = TaskState::Unused;
            self.tasks[cur as usize].base.entry = None;
            kprintln!("cfs: task {} exited", cur);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() {}

    /// Walks the timeline in order, returning (cardinality, weight sum,
    /// minimum vruntime).
    fn scan_queue(cfs: &Cfs) -> (u32, u64, Option<u64>) {
        let mut count = 0;
        let mut weight = 0;
        let mut min = None;
        let mut cur = cfs.rq.tasks_timeline.first(&cfs.tasks);
        while let Some(id) = cur {
            let se = &cfs.tasks[id as usize].se;
            assert!(se.on_rq);
            count += 1;
            weight += se.weight as u64;
            if min.is_none() {
                min = Some(se.vruntime);
            }
            cur = RbRoot::next(&cfs.tasks, id);
        }
        (count, weight, min)
    }

    fn assert_counters_match(cfs: &Cfs) {
        let (count, weight, min) = scan_queue(cfs);
        assert_eq!(cfs.rq.nr_running, count);
        assert_eq!(cfs.rq.total_weight, weight);
        match min {
            Some(_) => {
                let left = cfs.rq.leftmost.unwrap();
                assert_eq!(
                    cfs.tasks[left as usize].se.vruntime,
                    cfs.rq
                        .tasks_timeline
                        .first(&cfs.tasks)
                        .map(|id| cfs.tasks[id as usize].se.vruntime)
                        .unwrap()
                );
            }
            None => assert!(cfs.rq.leftmost.is_none()),
        }
    }

    #[test]
    fn weight_table_clamps_at_endpoints() {
        assert_eq!(nice_to_weight(0), 1024);
        assert_eq!(nice_to_weight(-20), 88761);
        assert_eq!(nice_to_weight(19), 15);
        assert_eq!(nice_to_weight(-100), 88761);
        assert_eq!(nice_to_weight(100), 15);
    }

    #[test]
    fn delta_scaling_is_exact_for_large_deltas() {
        assert_eq!(calc_delta_fair(1_000_000, 1024), 1_000_000);
        assert_eq!(calc_delta_fair(1_000_000, 512), 2_000_000);
        // Far beyond 32 bits; still scaled, not passed through.
        assert_eq!(calc_delta_fair(1 << 40, 2048), (1 << 40) / 2);
    }

    #[test]
    fn enqueue_dequeue_track_counters() {
        let mut cfs = Cfs::new();
        let mut pids = Vec::new();
        for nice in [0, 5, -5, 10, -10] {
            pids.push(cfs.create(noop, nice).unwrap() as u32);
            assert_counters_match(&cfs);
        }
        assert_eq!(cfs.rq().nr_running, 5);

        cfs.dequeue(pids[2]);
        assert_counters_match(&cfs);
        assert_eq!(cfs.rq().nr_running, 4);
        // Dequeue of an off-queue entity is a no-op.
        cfs.dequeue(pids[2]);
        assert_eq!(cfs.rq().nr_running, 4);

        cfs.enqueue(pids[2]);
        assert_counters_match(&cfs);
        assert_eq!(cfs.rq().nr_running, 5);
    }

    #[test]
    fn create_fails_when_table_full() {
        let mut cfs = Cfs::new();
        for _ in 0..NTASK {
            cfs.create(noop, 0).unwrap();
        }
        assert_eq!(cfs.create(noop, 0), Err(KernelError::NoSlot));
    }

    #[test]
    fn new_task_starts_at_min_vruntime() {
        let mut cfs = Cfs::new();
        let a = cfs.create(noop, 0).unwrap() as u32;
        for _ in 0..50 {
            cfs.tick();
        }
        let floor = cfs.rq().min_vruntime;
        assert!(floor > 0);
        let b = cfs.create(noop, 0).unwrap() as u32;
        assert_eq!(cfs.task(b).se.vruntime, floor);
        assert!(cfs.task(a).se.vruntime >= cfs.task(b).se.vruntime);
    }

    #[test]
    fn min_vruntime_never_decreases() {
        let mut cfs = Cfs::new();
        for nice in [0, 5, -5] {
            cfs.create(noop, nice).unwrap();
        }
        let mut last = 0;
        for _ in 0..300 {
            cfs.tick();
            let now = cfs.rq().min_vruntime;
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn runtime_shares_follow_weights() {
        let mut cfs = Cfs::new();
        let pids: Vec<u32> = [0, 5, -5]
            .iter()
            .map(|&nice| cfs.create(noop, nice).unwrap() as u32)
            .collect();
        assert_eq!(cfs.task(pids[0]).se.weight, 1024);
        assert_eq!(cfs.task(pids[1]).se.weight, 335);
        assert_eq!(cfs.task(pids[2]).se.weight, 3121);

        let mut switches = [0u32; 3];
        let mut last = None;
        for _ in 0..500 {
            cfs.tick();
            let cur = cfs.current();
            if cur != last {
                if let Some(id) = cur {
                    switches[pids.iter().position(|&p| p == id).unwrap()] += 1;
                }
                last = cur;
            }
        }
        // Every task has been scheduled in well more than three times.
        assert!(switches.iter().all(|&s| s >= 3), "switches: {:?}", switches);

        // sum_exec_runtime per unit weight must come out even, within 10%.
        let per_weight: Vec<f64> = pids
            .iter()
            .map(|&id| {
                let se = &cfs.task(id).se;
                se.sum_exec_runtime as f64 / se.weight as f64
            })
            .collect();
        for i in 0..per_weight.len() {
            for j in 0..per_weight.len() {
                let ratio = per_weight[i] / per_weight[j];
                assert!(
                    (0.9..=1.1).contains(&ratio),
                    "unfair split: {:?}",
                    per_weight
                );
            }
        }
    }

    #[test]
    fn state_machine_walks_unused_ready_running() {
        let mut cfs = Cfs::new();
        let pid = cfs.create(noop, 0).unwrap() as u32;
        assert_eq!(cfs.task(pid).base.state, TaskState::Ready);
        cfs.tick();
        assert_eq!(cfs.task(pid).base.state, TaskState::Running);
        assert_eq!(cfs.current(), Some(pid));
        cfs.exit_current();
        assert_eq!(cfs.task(pid).base.state, TaskState::Unused);
        assert_eq!(cfs.current(), None);
    }
}
