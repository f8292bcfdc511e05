//! The descriptor table.
//!
//! A descriptor pairs a kind with a backend object; reads, writes, polls,
//! and the final close dispatch over the object. The serial port is the
//! canonical backend. A descriptor may also carry no object at all, in
//! which case it polls empty and transfers nothing; the platform layer
//! uses such slots for kinds it services itself.

use bitflags::bitflags;

use crate::error::{KernelError, Result};
use crate::param::NFD;
use crate::uart::Uart;
use crate::{kprintln, some_or};

bitflags! {
    /// Readiness bits a backend reports from `poll`.
    pub struct FdFlags: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const ERROR    = 1 << 2;
        const HANGUP   = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdKind {
    Unused,
    File,
    Uart,
    Pipe,
    Socket,
}

/// Backend state owned by a descriptor.
pub enum FdObject {
    None,
    Uart(Uart),
}

impl FdObject {
    fn close(&mut self) {
        match self {
            FdObject::Uart(uart) => uart.close(),
            FdObject::None => {}
        }
    }
}

pub struct Fd {
    pub kind: FdKind,
    /// Flags captured by the most recent poll.
    pub flags: FdFlags,
    pub object: FdObject,
    pub ref_count: u32,
}

impl Fd {
    const INIT: Fd = Fd {
        kind: FdKind::Unused,
        flags: FdFlags::empty(),
        object: FdObject::None,
        ref_count: 0,
    };
}

/// Fixed table of descriptors with a rotating allocation cursor.
pub struct FdTable {
    fds: [Fd; NFD],
    next_fd: usize,
}

impl FdTable {
    pub const fn new() -> Self {
        Self {
            fds: [Fd::INIT; NFD],
            next_fd: 0,
        }
    }

    /// Claims the next unused slot, scanning from the rotating cursor.
    pub fn alloc(&mut self, kind: FdKind, object: FdObject) -> Result<i32> {
        debug_assert!(kind != FdKind::Unused, "FdTable::alloc");
        for i in 0..NFD {
            let num = (self.next_fd + i) % NFD;
            if self.fds[num].kind == FdKind::Unused {
                self.fds[num] = Fd {
                    kind,
                    flags: FdFlags::empty(),
                    object,
                    ref_count: 1,
                };
                self.next_fd = (num + 1) % NFD;
                kprintln!("fd: allocated fd {} ({:?})", num, kind);
                return Ok(num as i32);
            }
        }
        kprintln!("fd: no free descriptors");
        Err(KernelError::NoSlot)
    }

    /// Live descriptor by number; unused and out-of-range numbers are
    /// both "not there".
    pub fn get(&self, num: i32) -> Option<&Fd> {
        let fd = self.fds.get(usize::try_from(num).ok()?)?;
        if fd.kind == FdKind::Unused {
            return None;
        }
        Some(fd)
    }

    pub fn get_mut(&mut self, num: i32) -> Option<&mut Fd> {
        let fd = self.fds.get_mut(usize::try_from(num).ok()?)?;
        if fd.kind == FdKind::Unused {
            return None;
        }
        Some(fd)
    }

    /// Drops one reference; the last reference closes the backend and
    /// recycles the slot.
    pub fn close(&mut self, num: i32) -> Result<()> {
        let fd = some_or!(self.get_mut(num), {
            kprintln!("fd: close of invalid fd {}", num);
            return Err(KernelError::InvalidFd);
        });

        fd.ref_count -= 1;
        if fd.ref_count == 0 {
            let mut object = core::mem::replace(&mut fd.object, FdObject::None);
            object.close();
            self.fds[num as usize] = Fd::INIT;
            kprintln!("fd: closed fd {}", num);
        }
        Ok(())
    }

    /// Takes another reference to a live descriptor.
    pub fn dup(&mut self, num: i32) -> Result<()> {
        match self.get_mut(num) {
            Some(fd) => {
                fd.ref_count += 1;
                Ok(())
            }
            None => Err(KernelError::InvalidFd),
        }
    }

    /// Asks the backend for its readiness bits and caches them in the
    /// slot. An invalid descriptor polls as nothing at all.
    pub fn poll(&mut self, num: i32) -> FdFlags {
        let fd = some_or!(self.get_mut(num), return FdFlags::empty());
        let flags = match &fd.object {
            FdObject::Uart(uart) => uart.poll(),
            FdObject::None => FdFlags::empty(),
        };
        fd.flags = flags;
        flags
    }

    pub fn read(&mut self, num: i32, buf: &mut [u8]) -> Result<usize> {
        let fd = self.get_mut(num).ok_or(KernelError::InvalidFd)?;
        match &mut fd.object {
            FdObject::Uart(uart) => Ok(uart.read(buf)),
            FdObject::None => Ok(0),
        }
    }

    pub fn write(&mut self, num: i32, buf: &[u8]) -> Result<usize> {
        let fd = self.get_mut(num).ok_or(KernelError::InvalidFd)?;
        match &mut fd.object {
            FdObject::Uart(uart) => Ok(uart.write(buf)),
            FdObject::None => Ok(0),
        }
    }

    /// Overwrites the cached flags, for backends whose state changes
    /// outside of poll.
    pub fn update_flags(&mut self, num: i32, flags: FdFlags) {
        if let Some(fd) = self.get_mut(num) {
            fd.flags = flags;
        }
    }
}
