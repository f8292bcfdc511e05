//! Readiness-based descriptor monitoring.
//!
//! An instance keeps its interest set in a red-black tree keyed by
//! descriptor number, with the items themselves in a fixed per-instance
//! pool. Nothing registers callbacks: every wait re-polls each monitored
//! descriptor, translates the backend flags into event bits, and reports
//! level-triggered readiness in ascending descriptor order.
//!
//! Instance handles are negative, `-(index + 1)`, so they stay apart
//! from descriptor numbers; both live in the same integer space.

use bitflags::bitflags;

use crate::ds::rbtree::{Color, RbNode, RbPool, RbRoot, NIL};
use crate::error::{KernelError, Result};
use crate::file::{FdFlags, FdTable};
use crate::param::{NEPOLL, NEPOLLITEM};
use crate::{kprintln, some_or};

bitflags! {
    /// Event bits, wire-compatible with the usual epoll encoding.
    pub struct EpollEvents: u32 {
        const IN  = 0x001;
        const OUT = 0x004;
        const ERR = 0x008;
        const HUP = 0x010;
        /// Edge-triggered mode; accepted in an interest mask but not
        /// implemented, reporting stays level-triggered.
        const ET  = 0x8000_0000;
    }
}

pub const EPOLL_CTL_ADD: i32 = 1;
pub const EPOLL_CTL_DEL: i32 = 2;
pub const EPOLL_CTL_MOD: i32 = 3;

/// One interest registration or one reported event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpollEvent {
    pub events: EpollEvents,
    pub data: u64,
}

impl EpollEvent {
    pub const fn new(events: EpollEvents, data: u64) -> Self {
        Self { events, data }
    }
}

struct EpollItem {
    rb: RbNode,
    fd: i32,
    /// Interest mask.
    events: EpollEvents,
    user_data: u64,
    /// Readiness found by the most recent wait.
    revents: EpollEvents,
    in_use: bool,
}

impl EpollItem {
    const INIT: EpollItem = EpollItem {
        rb: RbNode::new(),
        fd: -1,
        events: EpollEvents::empty(),
        user_data: 0,
        revents: EpollEvents::empty(),
        in_use: false,
    };
}

impl RbPool for [EpollItem; NEPOLLITEM] {
    fn rb(&self, id: u32) -> &RbNode {
        &self[id as usize].rb
    }
    fn rb_mut(&mut self, id: u32) -> &mut RbNode {
        &mut self[id as usize].rb
    }
}

pub struct EpollInstance {
    epfd: i32,
    items_tree: RbRoot,
    items: [EpollItem; NEPOLLITEM],
    num_items: u32,
    in_use: bool,
}

impl EpollInstance {
    const INIT: EpollInstance = EpollInstance {
        epfd: -1,
        items_tree: RbRoot::new(),
        items: [EpollItem::INIT; NEPOLLITEM],
        num_items: 0,
        in_use: false,
    };

    pub fn num_items(&self) -> u32 {
        self.num_items
    }

    /// Tree search by descriptor number.
    fn find_item(&self, fd: i32) -> Option<u32> {
        let mut n = self.items_tree.node;
        while n != NIL {
            let item = &self.items[n as usize];
            if fd < item.fd {
                n = item.rb.left;
            } else if fd > item.fd {
                n = item.rb.right;
            } else {
                return Some(n);
            }
        }
        None
    }

    /// BST insertion keyed by descriptor number, then rebalance. The
    /// caller has ruled out duplicates.
    fn insert_item(&mut self, id: u32) {
        let EpollInstance {
            items_tree, items, ..
        } = self;
        let fd = items[id as usize].fd;

        let mut link = items_tree.node;
        let mut parent = NIL;
        let mut went_left = false;
        while link != NIL {
            parent = link;
            if fd < items[link as usize].fd {
                link = items.rb(link).left;
                went_left = true;
            } else {
                link = items.rb(link).right;
                went_left = false;
            }
        }

        *items.rb_mut(id) = RbNode {
            parent,
            left: NIL,
            right: NIL,
            color: Color::Red,
        };
        if parent == NIL {
            items_tree.node = id;
        } else if went_left {
            items.rb_mut(parent).left = id;
        } else {
            items.rb_mut(parent).right = id;
        }
        items_tree.insert_fixup(items, id);
        self.num_items += 1;
    }

    fn remove_item(&mut self, id: u32) {
        let EpollInstance {
            items_tree, items, ..
        } = self;
        items_tree.erase(items, id);
        items[id as usize] = EpollItem::INIT;
        self.num_items -= 1;
    }
}

fn flags_to_events(flags: FdFlags) -> EpollEvents {
    let mut events = EpollEvents::empty();
    if flags.contains(FdFlags::READABLE) {
        events |= EpollEvents::IN;
    }
    if flags.contains(FdFlags::WRITABLE) {
        events |= EpollEvents::OUT;
    }
    if flags.contains(FdFlags::ERROR) {
        events |= EpollEvents::ERR;
    }
    if flags.contains(FdFlags::HANGUP) {
        events |= EpollEvents::HUP;
    }
    events
}

/// The instance pool.
pub struct Epoll {
    instances: [EpollInstance; NEPOLL],
}

impl Epoll {
    pub const fn new() -> Self {
        Self {
            instances: [EpollInstance::INIT; NEPOLL],
        }
    }

    fn instance_mut(&mut self, epfd: i32) -> Option<&mut EpollInstance> {
        self.instances
            .iter_mut()
            .find(|inst| inst.in_use && inst.epfd == epfd)
    }

    pub fn instance(&self, epfd: i32) -> Option<&EpollInstance> {
        self.instances
            .iter()
            .find(|inst| inst.in_use && inst.epfd == epfd)
    }

    /// Creates an instance and returns its handle. The size hint is
    /// advisory and ignored, as it has been everywhere else for years.
    pub fn create(&mut self, _size: i32) -> Result<i32> {
        for (i, inst) in self.instances.iter_mut().enumerate() {
            if !inst.in_use {
                *inst = EpollInstance::INIT;
                inst.epfd = -((i as i32) + 1);
                inst.in_use = true;
                kprintln!("epoll: created instance {}", inst.epfd);
                return Ok(inst.epfd);
            }
        }
        kprintln!("epoll: no free instances");
        Err(KernelError::NoSlot)
    }

    /// Adds, modifies, or removes interest in a descriptor.
    pub fn ctl(
        &mut self,
        fds: &FdTable,
        epfd: i32,
        op: i32,
        fd: i32,
        event: Option<&EpollEvent>,
    ) -> Result<()> {
        let inst = some_or!(self.instance_mut(epfd), {
            kprintln!("epoll_ctl: invalid handle {}", epfd);
            return Err(KernelError::InvalidHandle);
        });
        if fds.get(fd).is_none() {
            kprintln!("epoll_ctl: invalid fd {}", fd);
            return Err(KernelError::InvalidFd);
        }

        match op {
            EPOLL_CTL_ADD => {
                if inst.find_item(fd).is_some() {
                    kprintln!("epoll_ctl: fd {} already in instance {}", fd, epfd);
                    return Err(KernelError::Exists);
                }
                let event = event.ok_or(KernelError::InvalidArg)?;
                let id = match inst.items.iter().position(|item| !item.in_use) {
                    Some(id) => id as u32,
                    None => {
                        kprintln!("epoll_ctl: item pool of {} exhausted", epfd);
                        return Err(KernelError::NoMem);
                    }
                };
                inst.items[id as usize] = EpollItem {
                    rb: RbNode::new(),
                    fd,
                    events: event.events,
                    user_data: event.data,
                    revents: EpollEvents::empty(),
                    in_use: true,
                };
                inst.insert_item(id);
                kprintln!(
                    "epoll_ctl: added fd {} to {} (events={:#x})",
                    fd,
                    epfd,
                    event.events.bits()
                );
                Ok(())
            }
            EPOLL_CTL_DEL => {
                let id = match inst.find_item(fd) {
                    Some(id) => id,
                    None => {
                        kprintln!("epoll_ctl: fd {} not in instance {}", fd, epfd);
                        return Err(KernelError::NotFound);
                    }
                };
                inst.remove_item(id);
                kprintln!("epoll_ctl: removed fd {} from {}", fd, epfd);
                Ok(())
            }
            EPOLL_CTL_MOD => {
                let id = match inst.find_item(fd) {
                    Some(id) => id,
                    None => {
                        kprintln!("epoll_ctl: fd {} not in instance {}", fd, epfd);
                        return Err(KernelError::NotFound);
                    }
                };
                let event = event.ok_or(KernelError::InvalidArg)?;
                let item = &mut inst.items[id as usize];
                item.events = event.events;
                item.user_data = event.data;
                kprintln!(
                    "epoll_ctl: modified fd {} in {} (events={:#x})",
                    fd,
                    epfd,
                    event.events.bits()
                );
                Ok(())
            }
            _ => {
                kprintln!("epoll_ctl: invalid op {}", op);
                Err(KernelError::InvalidOp)
            }
        }
    }

    /// Collects pending readiness. The interest set is polled afresh in
    /// descriptor order, then items whose masked readiness is non-empty
    /// are reported, up to `events.len()`.
    ///
    /// With nothing ready and a non-zero timeout the call still returns
    /// zero after a trace; a timed park would need a platform timer.
    pub fn wait(
        &mut self,
        fds: &mut FdTable,
        epfd: i32,
        events: &mut [EpollEvent],
        timeout: i32,
    ) -> Result<usize> {
        let inst = some_or!(self.instance_mut(epfd), {
            kprintln!("epoll_wait: invalid handle {}", epfd);
            return Err(KernelError::InvalidHandle);
        });
        if events.is_empty() {
            kprintln!("epoll_wait: no room for events");
            return Err(KernelError::InvalidMaxevents);
        }

        // Refresh pass: poll every monitored descriptor and store the
        // masked readiness.
        let mut cur = inst.items_tree.first(&inst.items);
        while let Some(id) = cur {
            let item_fd = inst.items[id as usize].fd;
            let ready = flags_to_events(fds.poll(item_fd));
            let item = &mut inst.items[id as usize];
            item.revents = ready & item.events;
            cur = RbRoot::next(&inst.items, id);
        }

        // Report pass, in ascending descriptor order.
        let mut num_ready = 0;
        let mut cur = inst.items_tree.first(&inst.items);
        while let Some(id) = cur {
            if num_ready == events.len() {
                break;
            }
            let item = &inst.items[id as usize];
            if !item.revents.is_empty() {
                events[num_ready] = EpollEvent::new(item.revents, item.user_data);
                num_ready += 1;
                kprintln!(
                    "epoll_wait: fd {} ready (events={:#x})",
                    item.fd,
                    item.revents.bits()
                );
            }
            cur = RbRoot::next(&inst.items, id);
        }

        if num_ready == 0 && timeout != 0 {
            kprintln!("epoll_wait: would block (timeout={})", timeout);
        }
        Ok(num_ready)
    }

    /// Tears an instance down, erasing every interest item.
    pub fn close(&mut self, epfd: i32) -> Result<()> {
        let inst = some_or!(self.instance_mut(epfd), {
            kprintln!("epoll_close: invalid handle {}", epfd);
            return Err(KernelError::InvalidHandle);
        });
        while let Some(id) = inst.items_tree.first(&inst.items) {
            inst.remove_item(id);
        }
        *inst = EpollInstance::INIT;
        kprintln!("epoll: closed instance {}", epfd);
        Ok(())
    }
}
