use crate::intern::{intern, InternedString};

/// Function name carried by frames whose address could not be symbolicated.
pub const UNMAPPED_FUNCTION_NAME: &str = "[unmapped_function]";

/// One logical call site in a resolved frame, possibly produced by inlining.
///
/// `offset` is the image-relative offset of the sample itself, not of the
/// call site. `code_line` is the source line executing at this call site;
/// `func_line` is the line where the named function begins.
#[derive(Debug, Clone)]
pub struct InlineFrame {
    file: InternedString,
    func: InternedString,
    demangled: InternedString,
    offset: u64,
    code_line: i64,
    func_line: i64,
    die_offset: u64,
    image_name: InternedString,
}

impl InlineFrame {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file: InternedString,
        func: InternedString,
        demangled: InternedString,
        offset: u64,
        code_line: i64,
        func_line: i64,
        die_offset: u64,
        image_name: InternedString,
    ) -> Self {
        InlineFrame {
            file,
            func,
            demangled,
            offset,
            code_line,
            func_line,
            die_offset,
            image_name,
        }
    }

    pub fn file(&self) -> &InternedString {
        &self.file
    }

    pub fn func(&self) -> &InternedString {
        &self.func
    }

    pub fn demangled(&self) -> &InternedString {
        &self.demangled
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn code_line(&self) -> i64 {
        self.code_line
    }

    pub fn func_line(&self) -> i64 {
        self.func_line
    }

    pub fn die_offset(&self) -> u64 {
        self.die_offset
    }

    pub fn image_name(&self) -> &InternedString {
        &self.image_name
    }

    pub fn is_unmapped(&self) -> bool {
        self.func.as_str() == UNMAPPED_FUNCTION_NAME
    }
}

/// The symbolication result for one (image, image offset) pair.
///
/// A Callframe starts out raw, with no inline frames. Resolution either
/// fills it with one frame per inline level, outermost inline first and the
/// physical function last, or transitions it to the unmapped state, which
/// carries exactly one sentinel frame.
#[derive(Debug)]
pub struct Callframe {
    offset: u64,
    image_name: InternedString,
    inline_frames: Vec<InlineFrame>,
    unmapped: bool,
}

impl Callframe {
    pub(crate) fn new(offset: u64, image_name: InternedString) -> Self {
        Callframe {
            offset,
            image_name,
            inline_frames: Vec::new(),
            unmapped: false,
        }
    }

    pub(crate) fn add_frame(
        &mut self,
        file: InternedString,
        func: InternedString,
        demangled: InternedString,
        code_line: i64,
        func_line: i64,
        die_offset: u64,
    ) {
        self.inline_frames.push(InlineFrame::new(
            file,
            func,
            demangled,
            self.offset,
            code_line,
            func_line,
            die_offset,
            self.image_name.clone(),
        ));
    }

    pub(crate) fn set_unmapped(&mut self) {
        let unmapped_function = intern(UNMAPPED_FUNCTION_NAME);
        self.inline_frames.clear();
        self.inline_frames.push(InlineFrame::new(
            self.image_name.clone(),
            unmapped_function.clone(),
            unmapped_function,
            self.offset,
            -1,
            -1,
            0,
            self.image_name.clone(),
        ));
        self.unmapped = true;
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn image_name(&self) -> &InternedString {
        &self.image_name
    }

    pub fn inline_frames(&self) -> &[InlineFrame] {
        &self.inline_frames
    }

    pub fn is_unmapped(&self) -> bool {
        self.unmapped
    }

    /// True until the frame has been symbolicated or marked unmapped.
    pub fn is_raw(&self) -> bool {
        !self.unmapped && self.inline_frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::Callframe;
    use crate::intern::intern;

    #[test]
    fn raw_until_resolved() {
        let mut frame = Callframe::new(0x100, intern("/bin/a"));
        assert!(frame.is_raw());
        assert!(!frame.is_unmapped());

        frame.add_frame(intern("a.c"), intern("f"), intern("f"), 10, 5, 0x40);
        assert!(!frame.is_raw());
        assert_eq!(frame.inline_frames().len(), 1);
        assert_eq!(frame.inline_frames()[0].offset(), 0x100);
        assert_eq!(frame.inline_frames()[0].image_name().as_str(), "/bin/a");
    }

    #[test]
    fn unmapped_carries_single_sentinel_frame() {
        let mut frame = Callframe::new(0x100, intern("/bin/a"));
        frame.set_unmapped();
        assert!(frame.is_unmapped());
        assert!(!frame.is_raw());
        assert_eq!(frame.inline_frames().len(), 1);

        let sentinel = &frame.inline_frames()[0];
        assert!(sentinel.is_unmapped());
        assert_eq!(sentinel.func().as_str(), "[unmapped_function]");
        assert_eq!(sentinel.code_line(), -1);
        assert_eq!(sentinel.file().as_str(), "/bin/a");
    }
}
