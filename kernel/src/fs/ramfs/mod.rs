// SPDX-License-Identifier: MPL-2.0

//! A volatile filesystem whose data and metadata exist only in memory.
//! It backs the root of the filesystem tree.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::{
    device,
    vnode::{Dirent, Stat, Vnode, VnodeKind},
};
use crate::{prelude::*, vm::mmobj::MmObj, vm::vnode_pager::VnodePager};

const ROOT_INO: u64 = 1;

pub struct RamFs {
    root: Arc<RamVnode>,
    /// Inode table; `link` resolves its target through it.
    inodes: SpinLock<BTreeMap<u64, Weak<RamVnode>>>,
    next_ino: AtomicU64,
}

impl RamFs {
    pub fn new() -> Arc<Self> {
        let fs = Arc::new_cyclic(|weak_fs: &Weak<RamFs>| Self {
            root: Arc::new_cyclic(|weak_root| RamVnode {
                ino: ROOT_INO,
                fs: weak_fs.clone(),
                this: weak_root.clone(),
                nlink: AtomicUsize::new(2),
                node: Node::Dir(RwLock::new(DirNode {
                    parent: weak_root.clone(),
                    entries: BTreeMap::new(),
                })),
                pager: SpinLock::new(Weak::new()),
            }),
            inodes: SpinLock::new(BTreeMap::new()),
            next_ino: AtomicU64::new(ROOT_INO + 1),
        });
        fs.inodes
            .lock()
            .insert(ROOT_INO, Arc::downgrade(&fs.root));
        fs
    }

    pub fn root(self: &Arc<Self>) -> Arc<dyn Vnode> {
        self.root.clone()
    }

    fn alloc_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::SeqCst)
    }

    fn new_vnode(self: &Arc<Self>, node: Node) -> Arc<RamVnode> {
        let ino = self.alloc_ino();
        let vnode = Arc::new_cyclic(|weak| RamVnode {
            ino,
            fs: Arc::downgrade(self),
            this: weak.clone(),
            nlink: AtomicUsize::new(1),
            node,
            pager: SpinLock::new(Weak::new()),
        });
        self.inodes.lock().insert(ino, Arc::downgrade(&vnode));
        vnode
    }

    fn inode(&self, ino: u64) -> Option<Arc<RamVnode>> {
        self.inodes.lock().get(&ino)?.upgrade()
    }

    fn drop_inode(&self, ino: u64) {
        self.inodes.lock().remove(&ino);
    }
}

struct DirNode {
    parent: Weak<RamVnode>,
    entries: BTreeMap<String, Arc<RamVnode>>,
}

enum Node {
    Dir(RwLock<DirNode>),
    File(RwLock<Vec<u8>>),
    Device(VnodeKind),
}

pub(crate) struct RamVnode {
    ino: u64,
    fs: Weak<RamFs>,
    this: Weak<RamVnode>,
    nlink: AtomicUsize,
    node: Node,
    /// Memory object serving this file's pages, kept while mapped.
    pager: SpinLock<Weak<VnodePager>>,
}

impl RamVnode {
    fn fs(&self) -> Arc<RamFs> {
        self.fs.upgrade().expect("ramfs vnode outlived its filesystem")
    }

    fn this(&self) -> Arc<RamVnode> {
        self.this.upgrade().expect("stale self reference")
    }

    fn dir(&self) -> Result<&RwLock<DirNode>> {
        match &self.node {
            Node::Dir(dir) => Ok(dir),
            _ => Err(Error::new(Errno::ENOTDIR)),
        }
    }

    fn file_data(&self) -> Result<&RwLock<Vec<u8>>> {
        match &self.node {
            Node::File(data) => Ok(data),
            Node::Dir(_) => Err(Error::new(Errno::EISDIR)),
            Node::Device(_) => Err(Error::new(Errno::EINVAL)),
        }
    }

    fn device_driver(&self) -> Result<Arc<dyn device::ByteDevice>> {
        let Node::Device(kind) = &self.node else {
            return_errno!(Errno::EINVAL);
        };
        let dev = kind.devid().expect("device node without a device id");
        device::byte_device(dev)
            .ok_or(Error::with_message(Errno::ENXIO, "no driver for device"))
    }

    fn inc_nlink(&self) {
        self.nlink.fetch_add(1, Ordering::SeqCst);
    }

    fn dec_nlink(&self) {
        let old = self.nlink.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(old > 0);
        if old == 1 {
            self.fs().drop_inode(self.ino);
        }
    }
}

impl Vnode for RamVnode {
    fn kind(&self) -> VnodeKind {
        match &self.node {
            Node::Dir(_) => VnodeKind::Directory,
            Node::File(_) => VnodeKind::Regular,
            Node::Device(kind) => *kind,
        }
    }

    fn ino(&self) -> u64 {
        self.ino
    }

    fn len(&self) -> usize {
        match &self.node {
            Node::Dir(dir) => dir.read().entries.len() + 2,
            Node::File(data) => data.read().len(),
            Node::Device(_) => 0,
        }
    }

    fn stat(&self) -> Result<Stat> {
        Ok(Stat {
            ino: self.ino,
            kind: self.kind(),
            nlink: self.nlink.load(Ordering::SeqCst),
            len: self.len(),
        })
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Vnode>> {
        let dir = self.dir()?.read();
        if name == ".." {
            let parent = dir.parent.upgrade().expect("directory without a parent");
            return Ok(parent);
        }
        let vnode = dir
            .entries
            .get(name)
            .cloned()
            .ok_or(Error::new(Errno::ENOENT))?;
        Ok(vnode)
    }

    fn create(&self, name: &str) -> Result<Arc<dyn Vnode>> {
        let mut dir = self.dir()?.write();
        if dir.entries.contains_key(name) {
            return_errno!(Errno::EEXIST);
        }
        let vnode = self.fs().new_vnode(Node::File(RwLock::new(Vec::new())));
        dir.entries.insert(String::from(name), vnode.clone());
        Ok(vnode)
    }

    fn mknod(&self, name: &str, kind: VnodeKind) -> Result<()> {
        if !kind.is_device() {
            return_errno_with_message!(Errno::EINVAL, "mknod only creates device files");
        }
        let mut dir = self.dir()?.write();
        if dir.entries.contains_key(name) {
            return_errno!(Errno::EEXIST);
        }
        let vnode = self.fs().new_vnode(Node::Device(kind));
        dir.entries.insert(String::from(name), vnode);
        Ok(())
    }

    fn mkdir(&self, name: &str) -> Result<Arc<dyn Vnode>> {
        let mut dir = self.dir()?.write();
        if dir.entries.contains_key(name) {
            return_errno!(Errno::EEXIST);
        }
        let child = self.fs().new_vnode(Node::Dir(RwLock::new(DirNode {
            parent: self.this.clone(),
            entries: BTreeMap::new(),
        })));
        // The new directory links to itself through "."; its ".." links us.
        child.nlink.store(2, Ordering::SeqCst);
        self.inc_nlink();
        dir.entries.insert(String::from(name), child.clone());
        Ok(child)
    }

    fn rmdir(&self, name: &str) -> Result<()> {
        let mut dir = self.dir()?.write();
        let target = dir
            .entries
            .get(name)
            .ok_or(Error::new(Errno::ENOENT))?;
        let target_dir = target.dir()?;
        if !target_dir.read().entries.is_empty() {
            return_errno!(Errno::ENOTEMPTY);
        }
        let target = dir.entries.remove(name).expect("entry vanished");
        target.dec_nlink(); // ".."
        target.dec_nlink(); // the entry itself
        self.dec_nlink();
        Ok(())
    }

    fn link(&self, target: &Arc<dyn Vnode>, name: &str) -> Result<()> {
        if target.kind().is_dir() {
            return_errno_with_message!(Errno::EISDIR, "cannot link a directory");
        }
        let node = self
            .fs()
            .inode(target.ino())
            .ok_or(Error::with_message(Errno::EINVAL, "link across filesystems"))?;
        if !core::ptr::eq(
            Arc::as_ptr(target) as *const (),
            Arc::as_ptr(&node) as *const (),
        ) {
            return_errno_with_message!(Errno::EINVAL, "link across filesystems");
        }
        let mut dir = self.dir()?.write();
        if dir.entries.contains_key(name) {
            return_errno!(Errno::EEXIST);
        }
        node.inc_nlink();
        dir.entries.insert(String::from(name), node);
        Ok(())
    }

    fn unlink(&self, name: &str) -> Result<()> {
        let mut dir = self.dir()?.write();
        let target = dir
            .entries
            .get(name)
            .ok_or(Error::new(Errno::ENOENT))?;
        if target.kind().is_dir() {
            return_errno_with_message!(Errno::EISDIR, "unlink of a directory");
        }
        let target = dir.entries.remove(name).expect("entry vanished");
        target.dec_nlink();
        Ok(())
    }

    fn readdir(&self, pos: usize) -> Result<Option<Dirent>> {
        let dir = self.dir()?.read();
        match pos {
            0 => Ok(Some(Dirent {
                ino: self.ino,
                name: String::from("."),
            })),
            1 => {
                let parent = dir.parent.upgrade().expect("directory without a parent");
                Ok(Some(Dirent {
                    ino: parent.ino,
                    name: String::from(".."),
                }))
            }
            n => Ok(dir.entries.iter().nth(n - 2).map(|(name, vnode)| Dirent {
                ino: vnode.ino,
                name: name.clone(),
            })),
        }
    }

    fn read_at(&self, off: usize, buf: &mut [u8]) -> Result<usize> {
        if let Node::Device(_) = &self.node {
            return self.device_driver()?.read_at(off, buf);
        }
        let data = self.file_data()?.read();
        if off >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - off);
        buf[..n].copy_from_slice(&data[off..off + n]);
        Ok(n)
    }

    fn write_at(&self, off: usize, buf: &[u8]) -> Result<usize> {
        if let Node::Device(_) = &self.node {
            return self.device_driver()?.write_at(off, buf);
        }
        let mut data = self.file_data()?.write();
        let end = off + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[off..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn truncate(&self, len: usize) -> Result<()> {
        let mut data = self.file_data()?.write();
        data.resize(len, 0);
        Ok(())
    }

    fn fill_page(&self, pagenum: usize, buf: &mut [u8]) -> Result<()> {
        let data = self.file_data()?.read();
        let start = pagenum * PAGE_SIZE;
        buf.fill(0);
        if start < data.len() {
            let n = PAGE_SIZE.min(data.len() - start);
            buf[..n].copy_from_slice(&data[start..start + n]);
        }
        Ok(())
    }

    fn clean_page(&self, pagenum: usize, buf: &[u8]) -> Result<()> {
        let mut data = self.file_data()?.write();
        let start = pagenum * PAGE_SIZE;
        if start >= data.len() {
            return Ok(());
        }
        let n = PAGE_SIZE.min(data.len() - start);
        data[start..start + n].copy_from_slice(&buf[..n]);
        Ok(())
    }

    fn mmap(self: Arc<Self>) -> Result<Arc<dyn MmObj>> {
        if !self.kind().is_regular() {
            return_errno_with_message!(Errno::EINVAL, "only regular files can be mapped");
        }
        let mut pager = self.pager.lock();
        if let Some(existing) = pager.upgrade() {
            return Ok(existing);
        }
        let fresh = VnodePager::new(self.this());
        *pager = Arc::downgrade(&fresh);
        Ok(fresh)
    }
}
