//! Shared memory region and window mapping

use std::{
    ffi::CString,
    fs::{File, OpenOptions},
    os::fd::{AsRawFd, OwnedFd, RawFd},
    os::unix::fs::OpenOptionsExt,
    path::Path,
};

use memmap2::{MmapMut, MmapOptions};
#[cfg(target_os = "linux")]
use nix::{
    sys::memfd::{memfd_create, MemFdCreateFlag},
    unistd::ftruncate,
};

use crate::{
    config::PAGE_SIZE,
    error::{FabricError, Result},
};

use super::config::{BackingType, RegionConfig};

/// A full mapping of the fabric region.
///
/// Created once by the coordinator (which also creates and sizes the backing
/// file) and usable by any process that opens the same backing.
#[derive(Debug)]
pub struct SharedMemoryRegion {
    name: String,
    size: usize,
    backing_type: BackingType,
    mmap: MmapMut,
    /// Optional file handle for file-backed regions
    _file: Option<File>,
    /// Owned file descriptor for memfd regions
    _owned_fd: Option<OwnedFd>,
    fd: RawFd,
}

impl SharedMemoryRegion {
    /// Create or open the region described by `config` and map all of it
    pub fn new(config: RegionConfig) -> Result<Self> {
        config.validate()?;

        let (file, owned_fd, fd) = Self::create_backing(&config)?;
        let mmap = Self::create_mapping(&file, &owned_fd, config.size)?;

        Ok(Self {
            name: config.name,
            size: config.size,
            backing_type: config.backing_type,
            mmap,
            _file: file,
            _owned_fd: owned_fd,
            fd,
        })
    }

    /// Create the backing storage for the region
    fn create_backing(config: &RegionConfig) -> Result<(Option<File>, Option<OwnedFd>, RawFd)> {
        match config.backing_type {
            BackingType::FileBacked => Self::create_file_backing(config),
            #[cfg(target_os = "linux")]
            BackingType::MemFd => Self::create_memfd_backing(config),
        }
    }

    /// Create or open file-backed storage
    fn create_file_backing(config: &RegionConfig) -> Result<(Option<File>, Option<OwnedFd>, RawFd)> {
        let path = config.default_file_path();

        let file = if config.create {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .mode(config.permissions)
                .open(&path)
                .map_err(|e| FabricError::from_io(e, "failed to create region file"))?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| FabricError::from_io(e, "failed to open existing region file"))?
        };

        if config.create {
            file.set_len(config.size as u64)
                .map_err(|e| FabricError::from_io(e, "failed to size region file"))?;
        } else {
            let len = file
                .metadata()
                .map_err(|e| FabricError::from_io(e, "failed to stat region file"))?
                .len();
            if (len as usize) < config.size {
                return Err(FabricError::mapping(format!(
                    "region file {:?} is {} bytes, need {}",
                    path, len, config.size
                )));
            }
        }

        let fd = file.as_raw_fd();
        Ok((Some(file), None, fd))
    }

    /// Create memfd-backed storage
    #[cfg(target_os = "linux")]
    fn create_memfd_backing(config: &RegionConfig) -> Result<(Option<File>, Option<OwnedFd>, RawFd)> {
        let name_cstr = CString::new(config.name.clone())
            .map_err(|_| FabricError::invalid_parameter("name", "name contains null bytes"))?;

        let owned_fd = memfd_create(&name_cstr, MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|e| FabricError::mapping(format!("failed to create memfd: {}", e)))?;

        ftruncate(&owned_fd, config.size as i64)
            .map_err(|e| FabricError::mapping(format!("failed to size memfd: {}", e)))?;

        let raw_fd = owned_fd.as_raw_fd();
        Ok((None, Some(owned_fd), raw_fd))
    }

    /// Map the whole backing read/write
    fn create_mapping(file: &Option<File>, owned_fd: &Option<OwnedFd>, size: usize) -> Result<MmapMut> {
        match (file, owned_fd) {
            (Some(f), _) => unsafe {
                MmapOptions::new()
                    .len(size)
                    .map_mut(f)
                    .map_err(|e| FabricError::from_io(e, "failed to map region"))
            },
            (None, Some(fd)) => unsafe {
                MmapOptions::new()
                    .len(size)
                    .map_mut(fd)
                    .map_err(|e| FabricError::from_io(e, "failed to map region"))
            },
            (None, None) => Err(FabricError::mapping("no backing available for mapping")),
        }
    }

    /// Get the raw memory slice (read-only)
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// Get the raw memory slice (mutable)
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    /// Get a mutable pointer to the start of the region without exclusive
    /// borrow
    ///
    /// # Safety
    /// Caller must uphold the fabric write-partitioning rules: distinct
    /// parties never write the same bytes outside the mailbox atomics.
    pub unsafe fn as_mut_ptr_unchecked(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }

    /// Get the size of the region
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the name of the region
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the backing type
    pub fn backing_type(&self) -> BackingType {
        self.backing_type
    }

    /// Get the file descriptor
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Flush changes to persistent storage (for file-backed regions)
    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| FabricError::from_io(e, "failed to flush region"))
    }
}

unsafe impl Send for SharedMemoryRegion {}
unsafe impl Sync for SharedMemoryRegion {}

/// A mapping of a page-aligned sub-range of the region backing.
///
/// Peers map their own slice and a control view of slice 0 as windows instead
/// of mapping the whole region.
#[derive(Debug)]
pub struct MappedWindow {
    mmap: MmapMut,
    offset: usize,
}

impl MappedWindow {
    /// Map `len` bytes of the file at `path` starting at `offset`
    pub fn map_file(path: &Path, offset: usize, len: usize) -> Result<Self> {
        if offset & (PAGE_SIZE - 1) != 0 {
            return Err(FabricError::mapping(format!(
                "window offset {:#x} is not {} aligned",
                offset, PAGE_SIZE
            )));
        }
        if len == 0 {
            return Err(FabricError::mapping("window length must be non-zero"));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| FabricError::from_io(e, "failed to open region file for window"))?;

        let file_len = file
            .metadata()
            .map_err(|e| FabricError::from_io(e, "failed to stat region file"))?
            .len() as usize;
        if file_len < offset + len {
            return Err(FabricError::mapping(format!(
                "window {:#x}+{:#x} exceeds region size {:#x}",
                offset, len, file_len
            )));
        }

        let mmap = unsafe {
            MmapOptions::new()
                .offset(offset as u64)
                .len(len)
                .map_mut(&file)
                .map_err(|e| FabricError::from_io(e, "failed to map window"))?
        };

        Ok(Self { mmap, offset })
    }

    /// Byte offset of this window within the region
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Window length in bytes
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Whether the window is empty (never true for a mapped window)
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Get the window contents (read-only)
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// Get the window contents (mutable)
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    /// Get a mutable pointer to the window without exclusive borrow
    ///
    /// # Safety
    /// Same partitioning rules as
    /// [`SharedMemoryRegion::as_mut_ptr_unchecked`].
    pub unsafe fn as_mut_ptr_unchecked(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }
}

unsafe impl Send for MappedWindow {}
unsafe impl Sync for MappedWindow {}
