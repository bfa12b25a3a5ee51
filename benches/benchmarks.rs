use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use geo::{polygon, AffineTransform};
use ndarray::Array3;
use rasterstack::{CropOptions, Crs, DType, GeometrySource, MemDataset, Metadata, Raster};

const SIZE: (usize, usize) = (512, 512);
const BANDS: usize = 3;

fn raster() -> Raster {
    let (height, width) = SIZE;
    let metadata = Metadata {
        crs: Crs::wgs84(),
        transform: AffineTransform::new(0.001, 0.0, 10.0, 0.0, -0.001, 52.0),
        width,
        height,
        count: BANDS,
        dtype: DType::Float32,
        nodata: Some(-1.0),
    };
    let stack = Array3::from_shape_fn((BANDS, height, width), |(band, row, col)| {
        (band * 7 + row + col) as f32
    });
    let dataset = MemDataset::new(stack, metadata).unwrap();
    Raster::from_dataset(&dataset, None).unwrap()
}

fn bench_coordinates(c: &mut Criterion) {
    let raster = raster();
    c.bench_function("coordinates", |b| {
        b.iter(|| black_box(&raster).coordinates().unwrap())
    });
}

fn bench_nearest_pixel(c: &mut Criterion) {
    let raster = raster();
    c.bench_function("nearest_pixel", |b| {
        b.iter(|| raster.nearest_pixel(black_box(51.7), black_box(10.3)).unwrap())
    });
}

fn bench_crop(c: &mut Criterion) {
    let source = GeometrySource::from(polygon![
        (x: 10.1, y: 51.6),
        (x: 10.4, y: 51.6),
        (x: 10.4, y: 51.9),
        (x: 10.1, y: 51.9),
    ]);
    let options = CropOptions::default();
    c.bench_function("crop", |b| {
        b.iter_batched(
            raster,
            |mut raster| raster.crop(black_box(&source), None, &options).unwrap(),
            criterion::BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_coordinates, bench_nearest_pixel, bench_crop);
criterion_main!(benches);
