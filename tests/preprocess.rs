use burn::data::dataset::Dataset;
use image::{GrayImage, Luma};
use lenet::{
    data::FolderDigits,
    preprocess::{invert_digits, DigitFolder},
};

/// JPEG is lossy, so uniform images are compared with a tolerance.
const JPEG_TOLERANCE: i16 = 4;

fn write_uniform_folder(folder: &DigitFolder, per_class: usize, value: u8) {
    for label in 0..10 {
        std::fs::create_dir_all(folder.class_dir(label)).unwrap();
        for index in 0..per_class {
            GrayImage::from_pixel(28, 28, Luma([value]))
                .save(folder.image_path(label, index))
                .unwrap();
        }
    }
}

#[test]
fn invert_writes_every_image_with_inverted_pixels() {
    let workspace = tempfile::tempdir().unwrap();
    let src = DigitFolder::new(workspace.path().join("src"));
    let dst = DigitFolder::new(workspace.path().join("dst"));
    write_uniform_folder(&src, 2, 40);

    let written =
        invert_digits(workspace.path().join("src"), workspace.path().join("dst")).unwrap();

    assert_eq!(written, 20);
    for label in 0..10 {
        assert_eq!(dst.count(label).unwrap(), 2);
    }
    let inverted = image::open(dst.image_path(7, 1)).unwrap().to_luma8();
    assert_eq!(inverted.dimensions(), (28, 28));
    for pixel in inverted.pixels() {
        assert!((pixel.0[0] as i16 - 215).abs() <= JPEG_TOLERANCE);
    }
}

#[test]
fn invert_fails_on_missing_source() {
    let workspace = tempfile::tempdir().unwrap();

    let result = invert_digits(workspace.path().join("missing"), workspace.path().join("dst"));

    assert!(matches!(result, Err(lenet::Error::Io { .. })));
}

#[test]
fn folder_dataset_resizes_and_labels_by_class() {
    let workspace = tempfile::tempdir().unwrap();
    let folder = DigitFolder::new(workspace.path());
    write_uniform_folder(&folder, 3, 200);

    let dataset = FolderDigits::new(workspace.path(), 32).unwrap();

    assert_eq!(dataset.len(), 30);
    let item = dataset.get(29).unwrap();
    assert_eq!(item.label, 9);
    assert_eq!(item.size, 32);
    assert_eq!(item.pixels.len(), 32 * 32);
    assert!(dataset.get(30).is_none());
}
