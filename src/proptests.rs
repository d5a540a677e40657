//! Property-based tests for the copy paths and the detector.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::detect::CorruptionDetector;
    use crate::diagnostics::Diagnostics;
    use crate::extractor::{AccessPath, FrameExtractor};
    use crate::fallback::tests::HoleyMemory;
    use crate::fallback::{DEFAULT_RAW_OFFSET, RawOffsetConfig, chunked_copy};
    use crate::frame::{ExtractionOutcome, FrameMetadata, PixelFormat, UYVY_BLACK};
    use crate::platform::UncheckedMemory;
    use crate::testing::{MockProvider, uyvy_gradient};

    const SENTINEL: u8 = 0xC7;

    fn extractor() -> FrameExtractor {
        FrameExtractor::builder()
            .raw_offset(Some(RawOffsetConfig {
                min_address: 1,
                max_address: u64::MAX,
                ..RawOffsetConfig::default()
            }))
            .with_fault_boundary(std::sync::Arc::new(UncheckedMemory))
            .build()
    }

    fn provider_for(path: AccessPath, frame: (FrameMetadata, Vec<u8>)) -> MockProvider {
        let provider = MockProvider::new(frame);
        match path {
            AccessPath::VideoBuffer => provider.with_video_buffer(),
            AccessPath::LegacyGetBytes => provider.with_legacy_frame(),
            AccessPath::RawOffset => provider.with_raw_pixels_at(DEFAULT_RAW_OFFSET),
        }
    }

    fn any_path() -> impl Strategy<Value = AccessPath> {
        prop_oneof![
            Just(AccessPath::VideoBuffer),
            Just(AccessPath::LegacyGetBytes),
            Just(AccessPath::RawOffset),
        ]
    }

    // Bytes written never exceed min(capacity, row_stride * height), on
    // any path, and nothing past that point is touched.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn copy_never_exceeds_frame_or_capacity(
            width in 4i32..48,
            height in 1i32..24,
            padding in 0i32..16,
            capacity_factor in 0.05f64..2.0,
            path in any_path(),
        ) {
            let stride = width * 2 + padding;
            let frame_len = (stride * height) as usize;
            let capacity = ((frame_len as f64 * capacity_factor) as usize).max(1);
            let provider = provider_for(path, uyvy_gradient(width, height, stride));

            let mut dst = vec![SENTINEL; capacity];
            let report = extractor().extract(&provider, &mut dst, &Diagnostics::disabled());
            let limit = capacity.min(frame_len);

            prop_assert_eq!(report.outcome, ExtractionOutcome::Success);
            prop_assert_eq!(report.path, Some(path));
            prop_assert!(report.bytes_copied <= limit);
            prop_assert_eq!(&dst[..limit], &provider.pixels()[..limit]);
            prop_assert!(dst[limit..].iter().all(|b| *b == SENTINEL));
        }
    }

    // A faulting region loses exactly the chunks it touches; those hold
    // phase-aligned black and everything else is real data.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn chunked_copy_accounts_every_byte(
            len in 1usize..4096,
            chunk in 4usize..512,
            hole_start in 0usize..4096,
            hole_len in 1usize..1024,
        ) {
            let source: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let base = source.as_ptr() as usize;
            let memory = HoleyMemory {
                start: base + hole_start,
                end: base + hole_start + hole_len,
            };
            let mut dst = vec![0u8; len];
            let report = unsafe { chunked_copy(&memory, source.as_ptr(), &mut dst, chunk, UYVY_BLACK) };

            prop_assert_eq!(report.requested, len);
            let mut copied = 0;
            for (index, (got, want)) in dst.chunks(chunk).zip(source.chunks(chunk)).enumerate() {
                if report.filled_chunks.contains(&index) {
                    let start = index * chunk;
                    for (i, byte) in got.iter().enumerate() {
                        prop_assert_eq!(*byte, UYVY_BLACK[(start + i) % 4]);
                    }
                } else {
                    prop_assert_eq!(got, want);
                    copied += got.len();
                }
            }
            prop_assert_eq!(report.copied, copied);
            prop_assert_eq!(report.bulk, hole_start >= len);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn detector_is_deterministic(
            width in 3i32..64,
            height in 1i32..32,
            seed in any::<u64>(),
        ) {
            let stride = width * 2;
            let meta = FrameMetadata {
                width,
                height,
                row_stride: stride,
                pixel_format: PixelFormat::UYVY_8BIT,
                flags: 0,
            };
            let mut state = seed;
            let pixels: Vec<u8> = (0..stride * height)
                .map(|_| {
                    state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                    (state >> 56) as u8
                })
                .collect();
            let detector = CorruptionDetector::default();
            prop_assert_eq!(detector.analyze(&pixels, &meta), detector.analyze(&pixels, &meta));
        }
    }
}
