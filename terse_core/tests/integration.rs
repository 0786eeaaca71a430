/// Integration tests over the public container API: every element type and
/// mode round-trips through compression and through the serialized stream,
/// bounds and shape errors leave the container untouched, and the output is
/// byte-identical whatever the degree of parallelism.
use terse_core::{
    Element, ElementType, Frame, Implicit, Mode, Reader, Settings, Terse, TerseError, TypedArray,
    Writer,
};

/// Deterministic LCG words.
fn pseudo_random_words(len: usize, seed: u64) -> Vec<u64> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            rng
        })
        .collect()
}

/// Detector-like data: mostly small values with occasional hot pixels, which
/// exercises narrow blocks next to wide ones. Values are truncated to `T`.
fn detector_frame<T: Element>(len: usize, seed: u64) -> Vec<T> {
    pseudo_random_words(len, seed)
        .into_iter()
        .enumerate()
        .map(|(i, w)| {
            let word = if i % 997 == 0 { w } else { (w >> 60) & 0x7 };
            T::from_word(word)
        })
        .collect()
}

fn full_range<T: Element>(len: usize, seed: u64) -> Vec<T> {
    pseudo_random_words(len, seed)
        .into_iter()
        .map(T::from_word)
        .collect()
}

// ── helpers ───────────────────────────────────────────────────────────────

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("terse_test_{}_{}.terse", name, std::process::id()))
}

fn serialize(terse: &Terse) -> Vec<u8> {
    let mut bytes = Vec::new();
    terse.write(&mut bytes).unwrap();
    bytes
}

fn check_round_trip<T: Element>(seed: u64) {
    let shapes: [&[usize]; 4] = [&[10_000], &[100, 37], &[7, 11, 13], &[3, 4, 5, 6]];
    for dims in shapes {
        let len: usize = dims.iter().product();
        for data in [detector_frame::<T>(len, seed), full_range::<T>(len, seed + 1)] {
            for mode in Mode::ALL {
                let terse = Terse::from_slice(&data, dims, mode).unwrap();
                assert_eq!(terse.dim(), dims);
                assert_eq!(terse.size(), len);
                assert_eq!(
                    terse.decompress_as::<T>().unwrap(),
                    data,
                    "{} {:?} {}",
                    T::TYPE,
                    dims,
                    mode
                );
                assert_eq!(terse.decompress().unwrap(), T::wrap(data.clone()));
            }
        }
    }
}

// ── tests ──────────────────────────────────────────────────────────────────

#[test]
fn test_round_trip_every_type_and_mode() {
    check_round_trip::<i8>(1);
    check_round_trip::<u8>(2);
    check_round_trip::<i16>(3);
    check_round_trip::<u16>(4);
    check_round_trip::<i32>(5);
    check_round_trip::<u32>(6);
    check_round_trip::<i64>(7);
    check_round_trip::<u64>(8);
}

#[test]
fn test_round_trip_with_fast_and_small_settings() {
    let data = detector_frame::<i32>(50_000, 11);
    for (fast, small) in [(true, false), (false, true), (true, true)] {
        let settings = Settings {
            block_size: 1000,
            fast,
            small,
            ..Settings::default()
        };
        for mode in Mode::ALL {
            let mut terse = Terse::with_settings(settings).unwrap();
            terse.append(&data, &[50, 1000], mode).unwrap();
            assert_eq!(terse.decompress_as::<i32>().unwrap(), data);
        }
    }
}

#[test]
fn test_reshape_reinterprets_flat_data() {
    let data = detector_frame::<u16>(24, 3);
    let mut terse = Terse::from_slice(&data, &[24], Mode::Default).unwrap();

    assert!(matches!(terse.set_dim(&[5, 5]), Err(TerseError::Shape(_))));
    assert_eq!(terse.dim(), &[24]);

    terse.set_dim(&[2, 3, 4]).unwrap();
    assert_eq!(terse.dim(), &[2, 3, 4]);
    assert_eq!(terse.decompress_as::<u16>().unwrap(), data);
}

#[test]
fn test_serialization_round_trip() {
    let mut terse = Terse::new();
    for i in 0..4u64 {
        let frame = detector_frame::<i16>(64 * 64, 100 + i);
        terse.append(&frame, &[64, 64], Mode::Default).unwrap();
        terse.set_metadata(i as usize, format!("frame {}", i)).unwrap();
    }
    let path = temp_path("serialization");
    let written = terse.save(&path).unwrap();
    assert_eq!(written, terse.file_size());
    assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, written);

    let back = Terse::load(&path).unwrap();
    assert_eq!(back.number_of_frames(), terse.number_of_frames());
    for (a, b) in terse.frames().iter().zip(back.frames()) {
        assert_eq!(a.dims(), b.dims());
        assert_eq!(a.metadata(), b.metadata());
        assert_eq!(a.decompress().unwrap(), b.decompress().unwrap());
    }
    assert_eq!(serialize(&back), serialize(&terse));
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_concatenated_streams_read_in_sequence() {
    let first = Terse::from_slice(&[1u32, 2, 3], &[3], Mode::Unsigned).unwrap();
    let second = Terse::from_slice(&[-7i8, 7], &[2], Mode::Signed).unwrap();
    let mut bytes = serialize(&first);
    bytes.extend(serialize(&second));

    let mut source = bytes.as_slice();
    let a = Terse::read(&mut source).unwrap();
    let b = Terse::read(&mut source).unwrap();
    assert!(source.is_empty());
    assert_eq!(a.decompress_as::<u32>().unwrap(), vec![1, 2, 3]);
    assert_eq!(b.decompress_as::<i8>().unwrap(), vec![-7, 7]);
}

#[test]
fn test_streaming_writer_and_reader() {
    let settings = Settings::default();
    let frames: Vec<Frame> = (0..3)
        .map(|i| {
            Frame::from_slice(&detector_frame::<u8>(300, i), &[300], Mode::SmallUnsigned, &settings)
                .unwrap()
        })
        .collect();
    let path = temp_path("streaming");
    let mut writer = Writer::create(&path, frames.len()).unwrap();
    for frame in &frames {
        writer.write_frame(frame).unwrap();
    }
    writer.finish().unwrap();

    let mut reader = Reader::open(&path).unwrap();
    assert_eq!(reader.frame_count(), 3);
    reader.skip_frames(2).unwrap();
    let last = reader.next_frame().unwrap().unwrap();
    assert_eq!(last.decompress().unwrap(), frames[2].decompress().unwrap());
    assert!(reader.next_frame().unwrap().is_none());
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_bounds_errors() {
    let mut terse = Terse::from_slice(&[1i32, 2, 3, 4, 5], &[5], Mode::Signed).unwrap();
    assert!(matches!(terse.at(1), Err(TerseError::Index { index: 1, len: 1 })));
    assert!(matches!(terse.remove_at(1), Err(TerseError::Index { .. })));
    assert!(matches!(
        terse.insert_at(2, &[1i32, 2, 3, 4, 5], &[5], Mode::Signed),
        Err(TerseError::Index { index: 2, len: 1 })
    ));
    assert_eq!(terse.number_of_frames(), 1);
    assert!(terse.insert_at(1, &[1i32, 2, 3, 4, 5], &[5], Mode::Signed).is_ok());
}

#[test]
fn test_insert_append_remove_scenario() {
    let data = [1i32, 2, 3, 4, 5];
    let mut terse = Terse::new();
    terse.append(&data, &[5], Mode::Signed).unwrap();
    terse.insert_at(0, &data, &[5], Mode::Signed).unwrap();
    assert_eq!(terse.number_of_frames(), 2);
    assert!(matches!(terse.implicit(), Implicit::Sequence(_)));
    assert_eq!(
        terse.at(0).unwrap().decompress().unwrap(),
        TypedArray::Int32(data.to_vec())
    );
    terse.remove_at(0).unwrap();
    assert_eq!(terse.number_of_frames(), 1);
    assert!(matches!(terse.implicit(), Implicit::Single(_)));
}

#[test]
fn test_insert_rejects_non_uniform_dims() {
    let mut terse = Terse::from_slice(&[1u16, 2, 3, 4, 5, 6], &[2, 3], Mode::Default).unwrap();
    assert!(matches!(
        terse.insert_at(0, &[1u16, 2, 3, 4, 5, 6], &[3, 2], Mode::Default),
        Err(TerseError::Shape(_))
    ));
    assert!(matches!(
        terse.insert_at(1, &[1u16, 2, 3, 4], &[4], Mode::Default),
        Err(TerseError::Shape(_))
    ));
    assert_eq!(terse.number_of_frames(), 1);
    assert_eq!(terse.dim(), &[2, 3]);
}

#[test]
fn test_default_mode_signed_blocks_of_unsigned_type_survive_serialization() {
    // values straddling the u16 wrap point are narrow only in the signed view
    let data: Vec<u16> = (0..5000u32)
        .map(|i| (i % 7) as u16)
        .map(|v| v.wrapping_sub(3))
        .collect();
    let terse = Terse::from_slice(&data, &[5000], Mode::Default).unwrap();
    let frame = terse.at(0).unwrap();
    assert!(frame.blocks().iter().all(|b| b.is_signed() && b.bit_width() == 3));

    let back = Terse::read(serialize(&terse).as_slice()).unwrap();
    let read_frame = back.at(0).unwrap();
    assert_eq!(read_frame.blocks(), frame.blocks());
    assert_eq!(back.decompress_as::<u16>().unwrap(), data);
}

#[test]
fn test_compaction_keeps_content() {
    let mut terse = Terse::new();
    for i in 0..5 {
        terse
            .append(&detector_frame::<u32>(20_000, i), &[20_000], Mode::Default)
            .unwrap();
    }
    let before: Vec<TypedArray> = terse.frames().iter().map(|f| f.decompress().unwrap()).collect();
    assert!(terse.reserved_bytes() > terse.used_bytes());

    terse.compact();
    assert_eq!(terse.reserved_bytes(), terse.used_bytes());
    let after: Vec<TypedArray> = terse.frames().iter().map(|f| f.decompress().unwrap()).collect();
    assert_eq!(after, before);
}

#[test]
fn test_output_identical_across_degrees_of_parallelism() {
    let data = detector_frame::<i16>(30 * 128 * 128, 42);
    let encode = |dop: f64, small: bool| {
        let settings = Settings {
            degree_of_parallelism: dop,
            small,
            block_size: 1024,
            ..Settings::default()
        };
        let mut terse = Terse::with_settings(settings).unwrap();
        terse.append(&data, &[30, 128, 128], Mode::Default).unwrap();
        serialize(&terse)
    };
    for small in [false, true] {
        let reference = encode(0.0, small);
        assert_eq!(encode(0.5, small), reference);
        assert_eq!(encode(1.0, small), reference);
    }
}

#[test]
fn test_binary_volume_small_unsigned_resolves_to_one_bit() {
    let dims = [30usize, 512, 512];
    let len: usize = dims.iter().product();
    let data: Vec<u16> = pseudo_random_words(len, 9)
        .into_iter()
        .map(|w| (w >> 63) as u16)
        .collect();

    let terse = Terse::from_slice(&data, &dims, Mode::SmallUnsigned).unwrap();
    assert_eq!(terse.decompress_as::<u16>().unwrap(), data);
    let frame = terse.at(0).unwrap();
    assert!(frame.blocks().iter().all(|b| b.bit_width() == 1));

    let raw = len * ElementType::UInt16.width();
    assert!(
        terse.used_bytes() * 14 < raw,
        "used {} bytes for {} raw bytes",
        terse.used_bytes(),
        raw
    );
}

#[test]
fn test_corrupted_streams_are_rejected() {
    let terse = Terse::from_slice(&detector_frame::<u32>(5000, 5), &[5000], Mode::Default).unwrap();
    let bytes = serialize(&terse);

    let mut bad_magic = bytes.clone();
    bad_magic[1] ^= 0xFF;
    assert!(matches!(
        Terse::read(bad_magic.as_slice()),
        Err(TerseError::Consistency(_))
    ));

    for cut in [3, 6, bytes.len() / 2, bytes.len() - 1] {
        assert!(
            matches!(Terse::read(&bytes[..cut]), Err(TerseError::Consistency(_))),
            "truncation at {} must be detected",
            cut
        );
    }
}

#[test]
fn test_recompress_changes_layout_not_content() {
    let data = detector_frame::<u64>(10_000, 77);
    let mut terse = Terse::from_slice(&data, &[10_000], Mode::Default).unwrap();
    let before = serialize(&terse);

    terse.set_block_size(256).unwrap();
    terse.set_small(true);
    assert_eq!(serialize(&terse), before);

    terse.recompress().unwrap();
    assert_ne!(serialize(&terse), before);
    assert_eq!(terse.decompress_as::<u64>().unwrap(), data);
}
