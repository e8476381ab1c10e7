//! In-memory representation of a multipart ZeroMQ message and the
//! envelope/payload labeling invariant carried over from the deprecated
//! ZMTP 1.x "label" bit.
//!
//! A [`Packet`] is an ordered sequence of [`Frame`]s. Every frame is either
//! "labeled" (part of the routing envelope) or not (payload). The
//! invariant enforced by [`Packet::push_front`]/[`Packet::push_back`]
//! mirrors the original `cppzmq::packet_t`: labeled frames always occupy a
//! contiguous prefix of the deque, so [`Packet::unseal`] can split a packet
//! into its envelope and its payload with a single scan from the front.

use std::collections::VecDeque;

/// One part of a multipart message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub label: bool,
}

impl Frame {
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>) -> Self { Self { data: data.into(), label: false } }

    #[must_use]
    pub fn labeled(data: impl Into<Vec<u8>>) -> Self { Self { data: data.into(), label: true } }
}

#[derive(Debug, thiserror::Error)]
#[error("message has to be labeled")]
pub struct LabelOrderError;

/// A multipart message, front-to-back in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    frames: VecDeque<Frame>,
}

impl Packet {
    #[must_use]
    pub fn new() -> Self { Self { frames: VecDeque::new() } }

    #[must_use]
    pub fn len(&self) -> usize { self.frames.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.frames.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> { self.frames.iter() }

    #[must_use]
    pub fn front(&self) -> Option<&Frame> { self.frames.front() }

    #[must_use]
    pub fn back(&self) -> Option<&Frame> { self.frames.back() }

    pub fn pop_front(&mut self) -> Option<Frame> { self.frames.pop_front() }

    pub fn pop_back(&mut self) -> Option<Frame> { self.frames.pop_back() }

    /// Push a frame onto the front. Invariant C1: an unlabeled frame
    /// cannot be pushed in front of a labeled one — the envelope must stay
    /// a contiguous prefix.
    ///
    /// # Errors
    /// Returns [`LabelOrderError`] if that invariant would be violated.
    pub fn push_front(&mut self, frame: Frame) -> Result<(), LabelOrderError> {
        if !frame.label && self.frames.front().is_some_and(|f| f.label) {
            return Err(LabelOrderError);
        }
        self.frames.push_front(frame);
        Ok(())
    }

    /// Push a frame onto the back. Invariant C2: a labeled frame cannot be
    /// appended after an unlabeled one — labels never trail payload.
    ///
    /// # Errors
    /// Returns [`LabelOrderError`] if that invariant would be violated.
    pub fn push_back(&mut self, frame: Frame) -> Result<(), LabelOrderError> {
        if frame.label && self.frames.back().is_some_and(|f| !f.label) {
            return Err(LabelOrderError);
        }
        self.frames.push_back(frame);
        Ok(())
    }

    /// Split off the labeled prefix, returning it as its own packet and
    /// leaving the remaining (payload) frames behind.
    #[must_use]
    pub fn unseal(&mut self) -> Self {
        let mut envelope = Self::new();
        while self.frames.front().is_some_and(|f| f.label) {
            let frame = self.frames.pop_front().unwrap_or_else(|| unreachable!("checked above"));
            envelope.frames.push_back(frame);
        }
        envelope
    }

    /// Prepend every frame of `envelope`, marking each one labeled.
    pub fn seal(&mut self, envelope: &Self) {
        for (idx, frame) in envelope.frames.iter().enumerate() {
            let mut labeled = frame.clone();
            labeled.label = true;
            self.frames.insert(idx, labeled);
        }
    }
}

impl FromIterator<Frame> for Packet {
    fn from_iter<T: IntoIterator<Item = Frame>>(iter: T) -> Self {
        Self { frames: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn unseal_splits_labeled_prefix_from_payload() {
        let mut packet: Packet =
            [Frame::labeled("id"), Frame::labeled(""), Frame::new("payload")].into_iter().collect();
        let envelope = packet.unseal();
        assert_eq!(envelope.len(), 2);
        assert_eq!(packet.len(), 1);
        assert_eq!(packet.front().expect("present").data, b"payload");
    }

    #[rstest]
    fn seal_relabels_and_prepends() {
        let mut packet: Packet = [Frame::new("payload")].into_iter().collect();
        let envelope: Packet = [Frame::new("id")].into_iter().collect();
        packet.seal(&envelope);
        assert_eq!(packet.len(), 2);
        assert!(packet.front().expect("present").label);
    }

    #[rstest]
    fn push_front_rejects_unlabeled_ahead_of_labeled() {
        let mut packet: Packet = [Frame::labeled("id")].into_iter().collect();
        let err = packet.push_front(Frame::new("oops"));
        assert!(err.is_err());
    }

    #[rstest]
    fn push_back_rejects_labeled_after_unlabeled() {
        let mut packet: Packet = [Frame::new("payload")].into_iter().collect();
        let err = packet.push_back(Frame::labeled("oops"));
        assert!(err.is_err());
    }

    #[rstest]
    fn push_front_allows_labeled_onto_labeled_prefix() {
        let mut packet: Packet = [Frame::labeled("inner")].into_iter().collect();
        packet.push_front(Frame::labeled("outer")).expect("allowed");
        assert_eq!(packet.len(), 2);
    }

    #[rstest]
    fn unseal_on_all_payload_packet_yields_empty_envelope() {
        let mut packet: Packet = [Frame::new("a"), Frame::new("b")].into_iter().collect();
        let envelope = packet.unseal();
        assert!(envelope.is_empty());
        assert_eq!(packet.len(), 2);
    }
}
