// SPDX-License-Identifier: MPL-2.0

//! Physical-memory bookkeeping: page frames and the simulated page
//! directory.

pub mod page_dir;
pub mod pframe;

pub use page_dir::PageDir;
pub use pframe::{pframe_get, pframe_get_resident, PFrame, PageSet};
