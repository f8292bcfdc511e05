//! The kernel context root.
//!
//! Every process-wide singleton lives in one struct: the page region,
//! the heap, the scheduler, the descriptor table, the epoll pool, and
//! the file store. The platform embeds a `Kernel` in a static and drives
//! it from its boot path, timer loop, and interrupt handlers; tests
//! instantiate as many independent cores as they like.

use crate::epoll::Epoll;
use crate::error::Result;
use crate::file::{FdKind, FdObject, FdTable};
use crate::fs::FileStore;
use crate::heap::Heap;
use crate::kalloc::PageAllocator;
use crate::kprintln;
use crate::param::{HEAPSIZE, NPAGE};
use crate::proc::cfs::Cfs;
use crate::uart::Uart;

pub struct Kernel {
    pub kmem: PageAllocator<NPAGE>,
    pub heap: Heap<HEAPSIZE>,
    pub cfs: Cfs,
    pub fds: FdTable,
    pub epoll: Epoll,
    pub fs: FileStore,
    console_fd: i32,
}

impl Kernel {
    pub const fn new() -> Self {
        Self {
            kmem: PageAllocator::new(),
            heap: Heap::new(),
            cfs: Cfs::new(),
            fds: FdTable::new(),
            epoll: Epoll::new(),
            fs: FileStore::new(),
            console_fd: -1,
        }
    }

    /// Brings the core up: the heap's initial block, the file store, and
    /// a descriptor for the console serial port.
    pub fn init(&mut self) -> Result<()> {
        self.heap.init();
        self.fs.init();
        let fd = self.fds.alloc(FdKind::Uart, FdObject::Uart(Uart::new()))?;
        self.console_fd = fd;
        kprintln!("kernel: core up, console on fd {}", fd);
        Ok(())
    }

    pub fn console_fd(&self) -> i32 {
        self.console_fd
    }

    /// One explicit scheduler tick; the platform calls this from its
    /// timer loop.
    pub fn tick(&mut self) {
        self.cfs.tick();
    }

    /// Serial receive interrupt: deposits one byte into the console
    /// port's ring. Runs to completion; nothing else may be touched from
    /// interrupt context.
    pub fn uart_intr(&mut self, byte: u8) {
        if let Some(fd) = self.fds.get_mut(self.console_fd) {
            if let FdObject::Uart(uart) = &mut fd.object {
                uart.recv_intr(byte);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::epoll::{EpollEvent, EpollEvents, EPOLL_CTL_ADD};
    use crate::fs::InodeType;

    // A core is megabytes of fixed pools; tests keep theirs in statics
    // rather than on the harness thread's stack.

    #[test]
    fn console_bytes_flow_from_interrupt_to_epoll() {
        static CORE: Mutex<Kernel> = Mutex::new(Kernel::new());
        let mut kernel = CORE.lock().unwrap();
        kernel.init().unwrap();
        let console = kernel.console_fd();

        let epfd = kernel.epoll.create(0).unwrap();
        let interest = EpollEvent::new(EpollEvents::IN, 1);
        let Kernel { fds, epoll, .. } = &mut *kernel;
        epoll
            .ctl(fds, epfd, EPOLL_CTL_ADD, console, Some(&interest))
            .unwrap();

        let mut events = [EpollEvent::new(EpollEvents::empty(), 0); 4];
        let Kernel { fds, epoll, .. } = &mut *kernel;
        assert_eq!(epoll.wait(fds, epfd, &mut events, 0).unwrap(), 0);

        kernel.uart_intr(b'k');
        let Kernel { fds, epoll, .. } = &mut *kernel;
        assert_eq!(epoll.wait(fds, epfd, &mut events, 0).unwrap(), 1);
        assert_eq!(events[0].events, EpollEvents::IN);

        let mut buf = [0u8; 4];
        assert_eq!(kernel.fds.read(console, &mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'k');
    }

    #[test]
    fn file_round_trip_through_the_core() {
        static CORE: Mutex<Kernel> = Mutex::new(Kernel::new());
        let mut kernel = CORE.lock().unwrap();
        kernel.init().unwrap();

        kernel.fs.create("boot.log", InodeType::File).unwrap();
        kernel.fs.write("boot.log", b"core up").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(kernel.fs.read("boot.log", &mut buf).unwrap(), 7);
        assert_eq!(&buf[..7], b"core up");
        assert_eq!(kernel.fs.stat("boot.log").unwrap().size, 7);
    }

    #[test]
    fn scheduler_and_heap_share_the_core() {
        static CORE: Mutex<Kernel> = Mutex::new(Kernel::new());
        let mut kernel = CORE.lock().unwrap();
        kernel.init().unwrap();

        fn idle() {}
        kernel.cfs.create(idle, 0).unwrap();
        kernel.cfs.create(idle, 5).unwrap();
        for _ in 0..20 {
            kernel.tick();
        }
        assert!(kernel.cfs.current().is_some());

        let ptr = kernel.heap.alloc(128).unwrap();
        kernel.heap.free(ptr);
        let pa = kernel.kmem.alloc(1);
        assert!(kernel.kmem.page(pa).iter().all(|&b| b == 0));
    }
}
