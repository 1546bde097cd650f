pub mod fifo;
pub mod year_ext;

/// The result of cutting one queue item in two.
pub struct HasSplit<A: Sized> {
    pub(crate) take: A,
    pub(crate) leave: A,
}
