use std::cell::OnceCell;

use pmcview_symbols::{intern, FrameRef, ImageCache, InlineFrame, InternedString};

use crate::address_space::AddressSpace;
use crate::sample::Sample;

/// Function name of the synthetic leaf frame some printers append to mark
/// time spent in the function itself.
pub const SELF_FUNCTION_NAME: &str = "[self]";

pub struct CallchainRecord {
    pub addr: u64,
    pub frame: FrameRef,
}

/// One observed sample shape and how often it was seen. Frame handles are
/// demanded at construction, while the address space still reflects the
/// moment of the sample; they resolve to symbol data once the images run
/// their resolution pass.
pub struct Callchain {
    records: Vec<CallchainRecord>,
    executable: InternedString,
    self_frame: OnceCell<InlineFrame>,
    sample_count: u64,
    kernel: bool,
}

impl Callchain {
    pub fn new(space: &mut AddressSpace, images: &mut ImageCache, sample: &Sample) -> Self {
        let records = sample
            .addresses()
            .iter()
            .map(|&addr| CallchainRecord {
                addr,
                frame: space.map_frame(images, addr),
            })
            .collect();
        let executable = space.executable_name(images);
        Callchain {
            records,
            executable,
            self_frame: OnceCell::new(),
            sample_count: 1,
            kernel: sample.is_kernel(),
        }
    }

    pub fn add_sample(&mut self) {
        self.sample_count += 1;
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn is_kernel(&self) -> bool {
        self.kernel
    }

    /// The sampled (leaf) address.
    pub fn address(&self) -> u64 {
        self.records.first().map(|record| record.addr).unwrap_or(0)
    }

    pub fn records(&self) -> &[CallchainRecord] {
        &self.records
    }

    /// Name of the executable mapped in the address space that produced
    /// this chain.
    pub fn executable_name(&self) -> &InternedString {
        &self.executable
    }

    pub fn is_mapped(&self, images: &ImageCache) -> bool {
        self.records
            .first()
            .and_then(|record| images.frame(record.frame))
            .map(|frame| !frame.is_unmapped())
            .unwrap_or(false)
    }

    /// The innermost inline frame of the leaf callframe.
    pub fn leaf_frame<'a>(&self, images: &'a ImageCache) -> Option<&'a InlineFrame> {
        self.records
            .first()
            .and_then(|record| images.frame(record.frame))
            .and_then(|frame| frame.inline_frames().first())
    }

    /// Append every inline frame of every callframe, leaf to root.
    pub fn flatten<'a>(&self, images: &'a ImageCache, out: &mut Vec<&'a InlineFrame>) {
        for record in &self.records {
            if let Some(frame) = images.frame(record.frame) {
                out.extend(frame.inline_frames().iter());
            }
        }
    }

    /// The lazily-created `[self]` frame, borrowing its position from the
    /// leaf frame.
    pub fn self_frame(&self, images: &ImageCache) -> Option<&InlineFrame> {
        let prototype = self.leaf_frame(images)?;
        Some(self.self_frame.get_or_init(|| {
            let name = intern(SELF_FUNCTION_NAME);
            InlineFrame::new(
                prototype.file().clone(),
                name.clone(),
                name,
                prototype.offset(),
                prototype.code_line(),
                prototype.func_line(),
                0,
                prototype.image_name().clone(),
            )
        }))
    }
}
