//! Write/read round trips through the on-disk dataset format

use mmtiff::{
    Coords, Image, Metadata, PixelType, SinglePlaneTiffStorage, StorageError, SummaryMetadata,
};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn gray16(coords: Coords, seed: u16) -> Image {
    let samples: Vec<u16> = (0..20).map(|i| seed.wrapping_mul(31).wrapping_add(i)).collect();
    Image::from_u16(&samples, 5, 4, coords).unwrap()
}

fn at_position(name: &str) -> Metadata {
    Metadata::new()
        .with_position_name(name)
        .with_pixel_size_um(0.65)
        .with_received_time("2024-03-05 14:02:11.250 +0100")
}

fn tif_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".tif"))
        .collect();
    names.sort();
    names
}

/// Every image put into a finalized dataset comes back from a fresh reader
/// with identical pixels, dimensions, and position name
#[test]
fn test_multi_position_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("acq_1");

    let mut written = Vec::new();
    {
        let storage = SinglePlaneTiffStorage::create(&root).unwrap();
        storage.set_summary_metadata(
            SummaryMetadata::new()
                .with_prefix("acq")
                .with_channel_names(["DAPI", "GFP"])
                .with_axis_order(["position", "time", "channel", "z"]),
        );
        let mut seed = 0;
        for (position, name) in [(0, "Pos0"), (1, "Pos1")] {
            for t in 0..2 {
                for c in 0..2 {
                    for z in 0..3 {
                        let coords = Coords::builder()
                            .stage_position(position)
                            .time(t)
                            .channel(c)
                            .z(z)
                            .build();
                        let image = gray16(coords.clone(), seed)
                            .with_metadata(at_position(name));
                        storage.put_image(&image).unwrap();
                        written.push(image);
                        seed += 1;
                    }
                }
            }
        }
        assert_eq!(storage.num_images(), 24);
        storage.freeze();
    }

    assert!(root.join("Pos0").join("metadata.txt").is_file());
    assert!(root.join("Pos1").join("metadata.txt").is_file());
    assert!(!root.join("metadata.txt").exists());
    assert_eq!(tif_files(&root.join("Pos0")).len(), 12);
    assert!(tif_files(&root.join("Pos1"))
        .contains(&"img_channel001_position001_time000000001_z002.tif".to_string()));

    let reader = SinglePlaneTiffStorage::open(&root).unwrap();
    assert!(!reader.is_writable());
    assert_eq!(reader.num_images(), 24);
    assert_eq!(reader.get_max_index("position"), Some(1));
    assert_eq!(reader.get_max_index("time"), Some(1));
    assert_eq!(reader.get_max_index("channel"), Some(1));
    assert_eq!(reader.get_max_index("z"), Some(2));
    assert_eq!(
        reader.get_axes(),
        vec!["position", "time", "channel", "z"]
    );
    assert_eq!(reader.position_names().get(&1).map(String::as_str), Some("Pos1"));

    let summary = reader.summary_metadata();
    assert_eq!(summary.prefix.as_deref(), Some("acq"));
    assert_eq!(summary.start_date.as_deref(), Some("2024-03-05"));

    for expected in &written {
        let image = reader.get_image(expected.coords()).unwrap();
        assert_eq!(image.width(), 5);
        assert_eq!(image.height(), 4);
        assert_eq!(image.pixel_type(), PixelType::Gray16);
        assert_eq!(image.pixels(), expected.pixels());
        assert_eq!(image.position_name(), expected.position_name());
        let md = image.metadata().unwrap();
        assert_eq!(md.received_time.as_deref(), Some("2024-03-05 14:02:11.250 +0100"));
        assert!((md.pixel_size_um.unwrap() - 0.65).abs() < 1e-9);
        assert!(md.file_name.as_deref().unwrap().starts_with(expected.position_name().unwrap()));
    }

    let pos1_z0 = reader.get_images_matching(&Coords::builder().stage_position(1).z(0).build());
    assert_eq!(pos1_z0.len(), 4);
    assert!(pos1_z0.iter().all(|i| i.position_name() == Some("Pos1")));

    println!("{}", reader.stats().summary());
}

/// Images without a stage position live at the dataset root, next to a
/// single metadata stream
#[test]
fn test_single_position_layout() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("timelapse");
    {
        let storage = SinglePlaneTiffStorage::create(&root).unwrap();
        for t in 0..4 {
            let pixels: Vec<u8> = (0..12).map(|i| (i * 3 + t) as u8).collect();
            let image =
                Image::new(pixels, 4, 3, PixelType::Gray8, Coords::builder().time(t).build())
                    .unwrap();
            storage.put_image(&image).unwrap();
        }
    }

    assert!(root.join("metadata.txt").is_file());
    assert_eq!(
        tif_files(&root),
        vec![
            "img_time000000000.tif",
            "img_time000000001.tif",
            "img_time000000002.tif",
            "img_time000000003.tif"
        ]
    );

    let reader = SinglePlaneTiffStorage::open(&root).unwrap();
    assert_eq!(reader.num_images(), 4);
    assert_eq!(reader.get_axes(), vec!["time"]);
    let image = reader.get_image(&Coords::builder().time(2).build()).unwrap();
    assert_eq!(&image.pixels()[..3], &[2, 5, 8]);
    assert!(reader.get_any_image().is_some());
}

/// RGB32 pixels survive storage in their blue-green-red-pad layout
#[test]
fn test_rgb32_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("color");
    let pixels: Vec<u8> = vec![1, 2, 3, 0, 4, 5, 6, 0, 7, 8, 9, 0, 10, 11, 12, 0];
    let coords = Coords::builder().channel(0).build();
    {
        let storage = SinglePlaneTiffStorage::create(&root).unwrap();
        let image = Image::from_raw(pixels.clone(), 2, 2, 4, 3, coords.clone()).unwrap();
        storage.put_image(&image).unwrap();
    }
    let reader = SinglePlaneTiffStorage::open(&root).unwrap();
    let image = reader.get_image(&coords).unwrap();
    assert_eq!(image.pixel_type(), PixelType::Rgb32);
    assert_eq!(&image.pixels()[..], &pixels[..]);
}

/// Distinct coordinates always land in distinct files
#[test]
fn test_file_names_injective() {
    let temp_dir = TempDir::new().unwrap();
    let storage = SinglePlaneTiffStorage::create(temp_dir.path().join("grid")).unwrap();
    let mut all = Vec::new();
    for c in 0..3 {
        for t in [0, 9, 10, 99, 100, 1_000_000] {
            all.push(Coords::builder().channel(c).time(t).build());
        }
        all.push(Coords::builder().channel(c).build());
        all.push(Coords::builder().channel(c).z(c).build());
    }
    for coords in &all {
        storage.put_image(&gray16(coords.clone(), 1)).unwrap();
    }
    let names: HashSet<String> = all.iter().filter_map(|c| storage.file_name(c)).collect();
    assert_eq!(names.len(), all.len());
    assert_eq!(tif_files(storage.root()).len(), all.len());
}

/// Maxima never decrease as images arrive, whatever the order
#[test]
fn test_max_indices_monotonic() {
    let temp_dir = TempDir::new().unwrap();
    let storage = SinglePlaneTiffStorage::create(temp_dir.path().join("order")).unwrap();
    let order = [(3, 0), (1, 7), (0, 2), (4, 1), (2, 9), (0, 0)];
    let mut previous = (0, 0);
    for (c, z) in order {
        storage
            .put_image(&gray16(Coords::builder().channel(c).z(z).build(), 0))
            .unwrap();
        let current = (
            storage.get_max_index("channel").unwrap(),
            storage.get_max_index("z").unwrap(),
        );
        assert!(current.0 >= previous.0 && current.1 >= previous.1);
        previous = current;
    }
    assert_eq!(previous, (4, 9));
    assert_eq!(storage.get_max_index("time"), None);
}

/// Images with unknown axes are refused before anything touches disk
#[test]
fn test_disallowed_axis_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("angles");
    let storage = SinglePlaneTiffStorage::create(&root).unwrap();

    let coords = Coords::builder().time(0).index("angle", 2).build();
    let err = storage.put_image(&gray16(coords.clone(), 0)).unwrap_err();
    match err {
        StorageError::DisallowedAxis { axis, .. } => assert_eq!(axis, "angle"),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!storage.has_image(&coords));
    assert!(storage.get_unordered_image_coords().is_empty());
    assert!(!root.exists());
}

/// A position index keeps its first name; a conflicting image is refused
/// and earlier images are untouched
#[test]
fn test_position_name_conflict() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("stage");
    let storage = SinglePlaneTiffStorage::create(&root).unwrap();

    let first = Coords::builder().stage_position(2).time(0).build();
    storage
        .put_image(&gray16(first.clone(), 5).with_metadata(Metadata::new().with_position_name("A")))
        .unwrap();

    let second = Coords::builder().stage_position(2).time(1).build();
    let err = storage
        .put_image(&gray16(second.clone(), 6).with_metadata(Metadata::new().with_position_name("B")))
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        StorageError::PositionNameConflict { index: 2, .. }
    ));

    assert!(!storage.has_image(&second));
    assert!(!root.join("B").exists());
    assert_eq!(storage.num_images(), 1);
    assert_eq!(storage.get_image(&first).unwrap().pixels(), gray16(first, 5).pixels());
}

/// Writing twice to the same coordinates keeps a single entry
#[test]
fn test_overwrite_same_coords() {
    let temp_dir = TempDir::new().unwrap();
    let storage = SinglePlaneTiffStorage::create(temp_dir.path().join("again")).unwrap();
    let coords = Coords::builder().time(3).build();
    storage.put_image(&gray16(coords.clone(), 1)).unwrap();
    storage.put_image(&gray16(coords.clone(), 2)).unwrap();
    assert_eq!(storage.num_images(), 1);
    assert_eq!(storage.get_image(&coords).unwrap().pixels(), gray16(coords, 2).pixels());
}

/// Frame interval and z-step travel with the summary record rather than the
/// per-file calibration, and come back on reopen
#[test]
fn test_calibration_survives_in_summary() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("calibrated");
    {
        let storage = SinglePlaneTiffStorage::create(&root).unwrap();
        storage.set_summary_metadata(
            SummaryMetadata::new()
                .with_z_step_um(0.25)
                .with_wait_interval_ms(1500.0),
        );
        for z in 0..2 {
            let image = gray16(Coords::builder().time(0).z(z).build(), z as u16)
                .with_metadata(Metadata::new().with_pixel_size_um(0.108));
            storage.put_image(&image).unwrap();
        }
        storage.freeze();
    }

    let reader = SinglePlaneTiffStorage::open(&root).unwrap();
    let summary = reader.summary_metadata();
    assert_eq!(summary.z_step_um, Some(0.25));
    assert_eq!(summary.wait_interval_ms, Some(1500.0));
    let image = reader.get_image(&Coords::builder().time(0).z(1).build()).unwrap();
    let size = image.metadata().unwrap().pixel_size_um.unwrap();
    assert!((size - 0.108).abs() < 1e-6);
}
