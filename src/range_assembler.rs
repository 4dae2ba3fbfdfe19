//! Byte range reads over fixed-size parts
//!
//! A range `[start, end]` (both inclusive) covers the parts
//! `start / part_size ..= end / part_size`. [`RangeReader`] fetches them one
//! at a time through the fetch coordinator, skips the leading bytes of the
//! first part and stops inside the last one, yielding one continuous stream.

use crate::coordinator::FetchCoordinator;
use crate::error::{Result, StoreError};
use crate::models::{ObjectId, ObjectIndex};
use crate::storage::PartReader;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf, Take};

const SKIP_CHUNK: usize = 64 * 1024;

/// Splits range reads into part fetches
#[derive(Clone)]
pub struct RangeAssembler {
    coordinator: Arc<FetchCoordinator>,
    part_size: u64,
}

impl RangeAssembler {
    pub fn new(coordinator: Arc<FetchCoordinator>, part_size: u64) -> Self {
        RangeAssembler {
            coordinator,
            part_size,
        }
    }

    /// Part indices covering `[start, end]`, in order
    ///
    /// Empty when `start > end`. Fails with `InvalidRange` when a part
    /// number in the range does not fit in a `u32`.
    pub fn indices(&self, id: &ObjectId, start: u64, end: u64) -> Result<Vec<ObjectIndex>> {
        if start > end {
            return Ok(Vec::new());
        }
        let first = ObjectIndex::for_offset(id.clone(), start, self.part_size)?.part;
        let last = ObjectIndex::for_offset(id.clone(), end, self.part_size)?.part;
        Ok((first..=last).map(|part| id.part(part)).collect())
    }

    /// Stream the bytes `start..=end` of an object
    ///
    /// Parts are fetched lazily as the stream is read. The stream ends early
    /// if the object is shorter than `end + 1` bytes.
    pub fn read(&self, id: &ObjectId, start: u64, end: u64) -> Result<RangeReader> {
        if start > end {
            return Err(StoreError::InvalidRange(format!(
                "start ({}) must be <= end ({})",
                start, end
            )));
        }
        // Every offset the reader visits lies in [start, end]
        ObjectIndex::for_offset(id.clone(), end, self.part_size)?;

        Ok(RangeReader {
            coordinator: self.coordinator.clone(),
            id: id.clone(),
            part_size: self.part_size,
            start,
            cur: start,
            end,
            state: State::Idle,
            sink: Vec::new(),
        })
    }
}

/// Continuous reader over a byte range of an object
pub struct RangeReader {
    coordinator: Arc<FetchCoordinator>,
    id: ObjectId,
    part_size: u64,

    /// First byte of the range
    start: u64,
    /// Next byte of the object to hand out
    cur: u64,
    /// Last byte of the range, inclusive
    end: u64,
    state: State,

    /// Scratch space for bytes skipped at the start of the first part
    sink: Vec<u8>,
}

enum State {
    Idle,
    Fetching(BoxFuture<'static, Result<PartReader>>),
    Reading {
        reader: Take<PartReader>,
        /// Bytes still to discard before `cur`
        skip: u64,
        /// Last byte this part contributes, inclusive
        last: u64,
    },
    Done,
}

impl RangeReader {
    fn part_start(&self) -> u64 {
        (self.cur / self.part_size) * self.part_size
    }

    fn fetch_future(&self) -> BoxFuture<'static, Result<PartReader>> {
        let coordinator = self.coordinator.clone();
        let index = ObjectIndex::for_offset(self.id.clone(), self.cur, self.part_size);
        async move { coordinator.fetch(&index?).await }.boxed()
    }
}

impl AsyncRead for RangeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            match &mut this.state {
                State::Idle => {
                    if this.cur > this.end {
                        this.state = State::Done;
                        continue;
                    }
                    this.state = State::Fetching(this.fetch_future());
                }
                State::Fetching(fut) => {
                    let reader = match ready!(fut.as_mut().poll(cx)) {
                        Ok(reader) => reader,
                        // Object ended exactly on the previous part boundary
                        Err(e) if this.cur > this.start && e.is_range_not_satisfiable() => {
                            this.state = State::Done;
                            continue;
                        }
                        Err(e) => return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e))),
                    };

                    let part_start = this.part_start();
                    let skip = this.cur - part_start;
                    let last = this.end.min(part_start + this.part_size - 1);
                    this.state = State::Reading {
                        reader: reader.take(last - part_start + 1),
                        skip,
                        last,
                    };
                }
                State::Reading { reader, skip, last } => {
                    if *skip > 0 {
                        let want = (*skip).min(SKIP_CHUNK as u64) as usize;
                        this.sink.resize(want, 0);
                        let mut scratch = ReadBuf::new(&mut this.sink[..want]);
                        ready!(Pin::new(&mut *reader).poll_read(cx, &mut scratch))?;
                        let got = scratch.filled().len() as u64;
                        if got == 0 {
                            // Part ends before the range starts
                            this.state = State::Done;
                            continue;
                        }
                        *skip -= got;
                        continue;
                    }

                    let before = buf.filled().len();
                    ready!(Pin::new(&mut *reader).poll_read(cx, buf))?;
                    let n = (buf.filled().len() - before) as u64;

                    if n == 0 {
                        this.state = if this.cur > *last {
                            State::Idle
                        } else {
                            // Short part: the object ends inside the range
                            State::Done
                        };
                        continue;
                    }

                    this.cur += n;
                    return Poll::Ready(Ok(()));
                }
                State::Done => return Poll::Ready(Ok(())),
            }
        }
    }
}
