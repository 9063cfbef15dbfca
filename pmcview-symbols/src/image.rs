use std::collections::HashMap;

use crate::dwarf::DwarfResolver;
use crate::frame::Callframe;
use crate::intern::{intern, InternedString};
use crate::range_map::RangeMap;

/// A stable handle to an [`Image`] owned by an [`ImageCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(usize);

/// A value handle naming one callframe: an image plus an image-relative
/// offset. Dereference through [`ImageCache::frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRef {
    pub image: ImageHandle,
    pub offset: u64,
}

/// One binary file and the callframes demanded from it.
///
/// Frames accumulate while events are replayed and stay raw until
/// [`Image::map_all`] runs; the frame table only ever grows, so a frame
/// reference obtained for an offset stays valid for the life of the run.
#[derive(Debug)]
pub struct Image {
    path: InternedString,
    frames: RangeMap<Callframe>,
    raw_frames: usize,
}

impl Image {
    fn new(path: InternedString) -> Self {
        Image {
            path,
            frames: RangeMap::new(),
            raw_frames: 0,
        }
    }

    pub fn path(&self) -> &InternedString {
        &self.path
    }

    /// The frame for `offset`, created raw on first demand.
    pub fn get_frame(&mut self, offset: u64) -> &Callframe {
        let raw_frames = &mut self.raw_frames;
        let path = &self.path;
        self.frames.get_or_insert_with(offset, || {
            *raw_frames += 1;
            Callframe::new(offset, path.clone())
        })
    }

    pub fn frame(&self, offset: u64) -> Option<&Callframe> {
        self.frames.get(offset)
    }

    pub fn frames(&self) -> impl Iterator<Item = &Callframe> {
        self.frames.values()
    }

    pub fn has_raw_frames(&self) -> bool {
        self.raw_frames > 0
    }

    /// Symbolicate every raw frame. Does nothing, and touches no files,
    /// when no raw frames exist. The DWARF state lives only for the
    /// duration of this call.
    pub fn map_all(&mut self, include_templates: bool) {
        if self.raw_frames == 0 {
            return;
        }
        let resolver = DwarfResolver::new(&self.path, include_templates);
        resolver.resolve(&mut self.frames);
        self.raw_frames = 0;
    }

    /// Transition every raw frame to the unmapped state without opening
    /// the file.
    pub fn map_all_unmapped(&mut self) {
        for frame in self.frames.values_mut() {
            if frame.is_raw() {
                frame.set_unmapped();
            }
        }
        self.raw_frames = 0;
    }
}

/// Owns one [`Image`] per path and vends handles to them.
///
/// Handle 0 is the unmapped-image singleton, used wherever no physical
/// file is known for a region; its frames resolve to the sentinel frame
/// without touching the filesystem.
#[derive(Debug)]
pub struct ImageCache {
    images: Vec<Image>,
    by_path: HashMap<InternedString, ImageHandle>,
    include_templates: bool,
}

impl ImageCache {
    pub fn new(include_templates: bool) -> Self {
        let unmapped = Image::new(InternedString::empty());
        ImageCache {
            images: vec![unmapped],
            by_path: HashMap::new(),
            include_templates,
        }
    }

    pub fn unmapped_image(&self) -> ImageHandle {
        ImageHandle(0)
    }

    /// The image for `path`, created on first request. Two requests for
    /// the same path return the same handle.
    pub fn get_image(&mut self, path: &str) -> ImageHandle {
        if path.is_empty() {
            return self.unmapped_image();
        }
        let path = intern(path);
        if let Some(handle) = self.by_path.get(&path) {
            return *handle;
        }
        let handle = ImageHandle(self.images.len());
        self.images.push(Image::new(path.clone()));
        self.by_path.insert(path, handle);
        handle
    }

    pub fn image(&self, handle: ImageHandle) -> &Image {
        &self.images[handle.0]
    }

    /// Demand the frame for `offset` in `handle`'s image, returning the
    /// value handle for it.
    pub fn get_frame(&mut self, handle: ImageHandle, offset: u64) -> FrameRef {
        self.images[handle.0].get_frame(offset);
        FrameRef {
            image: handle,
            offset,
        }
    }

    /// Dereference a frame handle. Present for every handle returned by
    /// [`ImageCache::get_frame`].
    pub fn frame(&self, frame_ref: FrameRef) -> Option<&Callframe> {
        self.images[frame_ref.image.0].frame(frame_ref.offset)
    }

    /// Resolve every image with outstanding raw frames. The unmapped
    /// image's frames transition straight to the sentinel state.
    pub fn map_all(&mut self) {
        for image in &mut self.images {
            if image.path().is_empty() {
                image.map_all_unmapped();
            } else {
                image.map_all(self.include_templates);
            }
        }
    }

    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.images.iter()
    }
}
