//! Device-visible memory allocation via the ION heap
//!
//! The display hardware reads frame buffers directly, so the pool cannot
//! live in ordinary process memory: each region comes from the IOMMU or
//! system ION heap, page-aligned, and is handed to the driver as a shared
//! fd plus offset. Allocation is behind a small trait pair so the pool
//! can be built over plain heap memory under test.

use std::io;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;

use tracing::{debug, warn};

use crate::ffi::*;
use crate::{Error, Result};

/// One device-visible memory region.
pub trait DeviceBuffer: Send + Sync {
    /// CPU mapping of the region.
    fn as_ptr(&self) -> *mut u8;

    /// Region size in bytes.
    fn len(&self) -> usize;

    /// Identifier the display hardware dereferences (a shareable fd).
    fn memory_id(&self) -> RawFd;

    /// Byte offset of the frame within the identified memory.
    fn offset(&self) -> u32;
}

/// Allocator of device-visible memory regions.
pub trait DeviceAllocator {
    fn allocate(&self, len: usize) -> Result<Box<dyn DeviceBuffer>>;
}

/// The real ION client. Each buffer owns its own `/dev/ion` connection,
/// mirroring how the driver tracks handle lifetime per client fd.
pub struct IonAllocator;

impl DeviceAllocator for IonAllocator {
    fn allocate(&self, len: usize) -> Result<Box<dyn DeviceBuffer>> {
        Ok(Box::new(IonBuffer::allocate(len)?))
    }
}

/// An ION region mapped into the process.
pub struct IonBuffer {
    ptr: *mut u8,
    len: usize,
    ion_fd: RawFd,
    mem_fd: RawFd,
    handle: IonUserHandle,
}

// The mapping is written by the frame producer and read only by the
// display hardware; CPU-side access is single-owner by the slot protocol.
unsafe impl Send for IonBuffer {}
unsafe impl Sync for IonBuffer {}

impl IonBuffer {
    fn allocate(len: usize) -> Result<Self> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page <= 0 {
            return Err(Error::BufferAlloc("cannot query page size".into()));
        }

        let ion_fd = unsafe {
            libc::open(
                b"/dev/ion\0".as_ptr() as *const libc::c_char,
                libc::O_RDWR | libc::O_DSYNC,
            )
        };
        if ion_fd < 0 {
            return Err(Error::BufferAlloc(format!(
                "cannot open /dev/ion: {}",
                io::Error::last_os_error()
            )));
        }

        let mut alloc = IonAllocationData {
            len,
            align: page as usize,
            heap_mask: ion_heap(ION_IOMMU_HEAP_ID) | ion_heap(ION_SYSTEM_HEAP_ID),
            flags: 0,
            handle: 0,
        };
        if let Err(e) = ion_ioctl(ion_fd, ION_IOC_ALLOC, &mut alloc as *mut _ as *mut c_void) {
            unsafe { libc::close(ion_fd) };
            return Err(Error::BufferAlloc(format!("ION_IOC_ALLOC: {}", e)));
        }

        let mut fd_data = IonFdData {
            handle: alloc.handle,
            fd: 0,
        };
        if let Err(e) = ion_ioctl(ion_fd, ION_IOC_MAP, &mut fd_data as *mut _ as *mut c_void) {
            free_handle(ion_fd, alloc.handle);
            unsafe { libc::close(ion_fd) };
            return Err(Error::BufferAlloc(format!("ION_IOC_MAP: {}", e)));
        }
        let mem_fd = fd_data.fd;

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                mem_fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let e = io::Error::last_os_error();
            free_handle(ion_fd, alloc.handle);
            unsafe {
                libc::close(mem_fd);
                libc::close(ion_fd);
            }
            return Err(Error::BufferAlloc(format!("mmap: {}", e)));
        }

        debug!(
            "ion buffer: {} bytes, ion_fd={} mem_fd={}",
            len, ion_fd, mem_fd
        );

        Ok(Self {
            ptr: ptr as *mut u8,
            len,
            ion_fd,
            mem_fd,
            handle: alloc.handle,
        })
    }
}

impl DeviceBuffer for IonBuffer {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }

    fn memory_id(&self) -> RawFd {
        self.mem_fd
    }

    fn offset(&self) -> u32 {
        0
    }
}

impl Drop for IonBuffer {
    fn drop(&mut self) {
        // Release everything we can; a failure on one resource must not
        // leak the others.
        let ret = unsafe { libc::munmap(self.ptr as *mut c_void, self.len) };
        if ret < 0 {
            warn!("munmap failed: {}", io::Error::last_os_error());
        }
        free_handle(self.ion_fd, self.handle);
        unsafe {
            libc::close(self.mem_fd);
            libc::close(self.ion_fd);
        }
    }
}

fn free_handle(ion_fd: RawFd, handle: IonUserHandle) {
    let mut data = IonHandleData { handle };
    if let Err(e) = ion_ioctl(ion_fd, ION_IOC_FREE, &mut data as *mut _ as *mut c_void) {
        warn!("ION_IOC_FREE failed: {}", e);
    }
}

fn ion_ioctl(fd: RawFd, request: u64, arg: *mut c_void) -> io::Result<()> {
    let ret = unsafe { libc::ioctl(fd, request as libc::c_ulong, arg) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
