use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::io::Cursor;
use tiffio::codecs::{CodecConfig, fax, lzw};
use tiffio::pixels::Raster;
use tiffio::{CompressionMethod, ReadParam, TiffReader, TiffWriter, WriteParam};

fn generate_data(w: usize, h: usize) -> Vec<u8> {
  let mut img = vec![0; w * h];

  for (i, pix) in img.iter_mut().enumerate() {
    *pix = ((i % w) / 16 + (i / w) / 8) as u8;
  }
  img
}

/// Bilevel page with text-like bursts of black
fn generate_page(w: usize, h: usize) -> Vec<u8> {
  let row_bytes = w.div_ceil(8);
  let mut page = vec![0; row_bytes * h];
  for y in 0..h {
    if (y / 12) % 2 == 0 {
      continue;
    }
    for x in 0..w {
      if (x / 5 + y / 3) % 7 < 2 {
        page[y * row_bytes + x / 8] |= 0x80 >> (x % 8);
      }
    }
  }
  page
}

fn criterion_benchmark(c: &mut Criterion) {
  let mut group = c.benchmark_group("codecs");
  group.significance_level(0.1).sample_size(20);

  let data = generate_data(2000, 1000);
  let packed = lzw::compress(&data).unwrap();
  group.bench_with_input("lzw_encode_2000x1000", &data, |b, data| b.iter(|| lzw::compress(black_box(data))));
  group.bench_with_input("lzw_decode_2000x1000", &packed, |b, packed| {
    b.iter(|| lzw::decompress(black_box(packed), data.len()))
  });

  let (w, h) = (1728, 2200);
  let page = generate_page(w, h);
  let cfg = CodecConfig {
    width: w,
    height: h,
    bits_per_sample: vec![1],
    ..Default::default()
  };
  let mode = fax::FaxMode::from_config(CompressionMethod::Fax4, &cfg).unwrap();
  let t6 = fax::encoder::encode(&page, w, h, mode).unwrap();
  group.bench_with_input("t6_encode_page", &page, |b, page| {
    b.iter(|| fax::encoder::encode(black_box(page), w, h, mode))
  });
  group.bench_with_input("t6_decode_page", &t6, |b, t6| b.iter(|| fax::decoder::decode(black_box(t6), w, h, mode)));
  group.finish();

  let mut group = c.benchmark_group("container");
  group.significance_level(0.1).sample_size(10);
  let raster = Raster::new_u8(1024, 768, 3, (0..1024 * 768 * 3).map(|i| (i % 251) as u8).collect());
  let param = WriteParam {
    compression: CompressionMethod::LZW,
    tile_size: Some((256, 256)),
    ..Default::default()
  };
  group.bench_function("write_tiled_lzw", |b| {
    b.iter(|| {
      let mut buf = Cursor::new(Vec::new());
      TiffWriter::new(&mut buf).unwrap().write(None, black_box(&raster), &param).unwrap();
    })
  });
  let mut file = Cursor::new(Vec::new());
  TiffWriter::new(&mut file).unwrap().write(None, &raster, &param).unwrap();
  group.bench_function("read_tiled_lzw", |b| {
    b.iter(|| TiffReader::new(Cursor::new(file.get_ref())).unwrap().read_image(0, &ReadParam::default()).unwrap())
  });
  group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
