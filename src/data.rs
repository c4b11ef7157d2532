use std::path::Path;

use burn::{
    data::{
        dataloader::batcher::Batcher,
        dataset::{
            transform::{Mapper, MapperDataset},
            vision::{MnistDataset, MnistItem},
            Dataset, InMemDataset,
        },
    },
    prelude::*,
};
use image::{imageops::FilterType, GrayImage};

use crate::{
    error::{Error, Result},
    preprocess::DigitFolder,
};

/// A square grayscale digit image, already resized for the network.
#[derive(Debug, Clone)]
pub struct DigitItem {
    /// Row-major pixels in `0..=255`, `size × size` of them.
    pub pixels: Vec<u8>,
    pub size: usize,
    pub label: u8,
}

impl DigitItem {
    /// Resize an arbitrary grayscale image to `size × size` with bilinear filtering.
    pub fn from_image(image: &GrayImage, size: usize, label: u8) -> Self {
        let resized = if image.width() as usize == size && image.height() as usize == size {
            image.clone()
        } else {
            image::imageops::resize(image, size as u32, size as u32, FilterType::Triangle)
        };

        Self {
            pixels: resized.into_raw(),
            size,
            label,
        }
    }
}

/// Resize MNIST items to the network input size.
struct ResizeMnist {
    size: usize,
}

impl Mapper<MnistItem, DigitItem> for ResizeMnist {
    fn map(&self, item: &MnistItem) -> DigitItem {
        let width = item.image[0].len() as u32;
        let height = item.image.len() as u32;
        let image = GrayImage::from_fn(width, height, |x, y| {
            image::Luma([item.image[y as usize][x as usize].clamp(0.0, 255.0) as u8])
        });

        DigitItem::from_image(&image, self.size, item.label)
    }
}

/// MNIST resized to `size × size`.
pub struct MnistDigits {
    dataset: MapperDataset<MnistDataset, ResizeMnist, MnistItem>,
}

impl Dataset<DigitItem> for MnistDigits {
    fn get(&self, index: usize) -> Option<DigitItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl MnistDigits {
    /// Training split, downloaded on first use.
    pub fn train(size: usize) -> Self {
        Self::new(MnistDataset::train(), size)
    }

    /// Test split, downloaded on first use.
    pub fn test(size: usize) -> Self {
        Self::new(MnistDataset::test(), size)
    }

    fn new(dataset: MnistDataset, size: usize) -> Self {
        Self {
            dataset: MapperDataset::new(dataset, ResizeMnist { size }),
        }
    }
}

/// Digit images laid out as `{root}/{d}/img{d}_{j}.jpg`, decoded and resized up front.
pub struct FolderDigits {
    dataset: InMemDataset<DigitItem>,
}

impl Dataset<DigitItem> for FolderDigits {
    fn get(&self, index: usize) -> Option<DigitItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl FolderDigits {
    pub fn new<P: AsRef<Path>>(root: P, size: usize) -> Result<Self> {
        let folder = DigitFolder::new(root.as_ref());
        let mut items = Vec::new();

        for (label, path) in folder.files()? {
            let image = image::open(&path).map_err(Error::image(&path))?;
            items.push(DigitItem::from_image(&image.to_luma8(), size, label));
        }

        log::info!(
            "Loaded {} digit images from {}",
            items.len(),
            root.as_ref().display()
        );

        Ok(Self {
            dataset: InMemDataset::new(items),
        })
    }
}

#[derive(Clone, Debug)]
pub struct DigitBatcher<B: Backend> {
    device: B::Device,
}

#[derive(Clone, Debug)]
pub struct DigitBatch<B: Backend> {
    /// `[batch_size, 1, size, size]`, values in `[0, 1]`.
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> DigitBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<DigitItem, DigitBatch<B>> for DigitBatcher<B> {
    fn batch(&self, items: Vec<DigitItem>) -> DigitBatch<B> {
        let images = items
            .iter()
            .map(|item| TensorData::new(item.pixels.clone(), [1, 1, item.size, item.size]))
            .map(|data| Tensor::<B, 4>::from_data(data.convert::<B::FloatElem>(), &self.device))
            .map(|tensor| tensor / 255)
            .collect();

        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    [(item.label as i64).elem::<B::IntElem>()],
                    &self.device,
                )
            })
            .collect();

        let images = Tensor::cat(images, 0);
        let targets = Tensor::cat(targets, 0);

        DigitBatch { images, targets }
    }
}
