// SPDX-License-Identifier: MPL-2.0

//! The virtual-memory core: memory objects, address-space maps, the page
//! fault handler, and simulated user-memory access.

pub mod anon;
pub mod mmobj;
pub mod page_fault;
pub mod shadow;
pub mod usermem;
pub mod vmmap;
pub mod vnode_pager;

pub use anon::AnonObj;
pub use mmobj::{bottom_object, MmObj};
pub use page_fault::{handle_page_fault, FaultCause};
pub use shadow::ShadowObj;
pub use vmmap::{MapFlags, Prot, SearchDir, VmArea, VmMap};
pub use vnode_pager::VnodePager;
