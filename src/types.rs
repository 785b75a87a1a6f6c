/// Byte range into the source text of one compile unit.
pub type Span = std::ops::Range<usize>;

/// Hard cap on runtime array allocation, checked when the size
/// expression is evaluated.
pub const MAX_ARRAY_LEN: usize = 1 << 20;
