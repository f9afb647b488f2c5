// crates/recut-media/src/poster.rs
//
// One-shot poster frame extraction: decode the frame at a timestamp and
// write it to disk as a PNG at the clip's native resolution.

use std::path::Path;

use anyhow::Result;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};

use crate::helpers::frame::{destripe, ensure_ffmpeg};
use crate::helpers::seek::seek_to_us;

/// Decode the frame at `timestamp_us` in `path` and write it to `dest` as
/// an RGB PNG. Requests past the end of the clip write the last decodable
/// frame.
pub fn save_poster_png(path: &Path, timestamp_us: u64, dest: &Path) -> Result<()> {
    ensure_ffmpeg();

    let mut ictx = ffmpeg::format::input(&path)?;
    let video_idx = ictx
        .streams()
        .best(Type::Video)
        .ok_or_else(|| anyhow::anyhow!("no video stream in {}", path.display()))?
        .index();

    let (tb_num, tb_den) = {
        let tb = ictx.stream(video_idx).unwrap().time_base();
        (tb.numerator() as i64, tb.denominator() as i64)
    };

    // Backward keyframe seek; pre-roll frames are filtered by PTS below.
    seek_to_us(&mut ictx, timestamp_us as i64, "save_poster_png");

    // Second context for decoder construction (Parameters borrows from the
    // Stream, which borrows ictx).
    let ictx2   = ffmpeg::format::input(&path)?;
    let stream2 = ictx2
        .stream(video_idx)
        .ok_or_else(|| anyhow::anyhow!("video stream vanished in {}", path.display()))?;
    let mut decoder = ffmpeg::codec::context::Context::from_parameters(stream2.parameters())?
        .decoder()
        .video()?;

    // Display dimensions, not the decoder's macroblock-padded coded size.
    let (out_w, out_h) = {
        let p = stream2.parameters();
        let (w, h) = unsafe { ((*p.as_ptr()).width as u32, (*p.as_ptr()).height as u32) };
        if w > 0 && h > 0 { (w, h) } else { (decoder.width(), decoder.height()) }
    };

    let mut scaler = SwsContext::get(
        decoder.format(), out_w, out_h,
        Pixel::RGB24,     out_w, out_h,
        Flags::BILINEAR,
    )?;

    // last_good holds the newest scaled frame in case EOF arrives before
    // the target (e.g. requesting the final frame of a clip).
    let mut last_good: Option<ffmpeg::util::frame::video::Video> = None;
    // Accept a frame up to half a typical frame early.
    let threshold_us = timestamp_us as i64 - 16_667;

    for (stream, packet) in ictx.packets().flatten() {
        if stream.index() != video_idx {
            continue;
        }
        if decoder.send_packet(&packet).is_err() {
            continue;
        }
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            let mut rgb = ffmpeg::util::frame::video::Video::empty();
            if scaler.run(&decoded, &mut rgb).is_err() {
                continue;
            }
            last_good = Some(rgb.clone());
            if let Some(pts) = decoded.pts() {
                let pts_us = pts * tb_num * 1_000_000 / tb_den;
                if pts_us < threshold_us {
                    continue; // pre-roll from the keyframe-aligned seek
                }
            }
            write_png(&rgb, out_w, out_h, dest)?;
            return Ok(());
        }
    }

    // EOF before the target — emit the last frame we saw.
    if let Some(rgb) = last_good {
        write_png(&rgb, out_w, out_h, dest)?;
        return Ok(());
    }

    Err(anyhow::anyhow!(
        "no frame found at {:.3}s in {}",
        timestamp_us as f64 / 1e6,
        path.display()
    ))
}

fn write_png(
    frame: &ffmpeg::util::frame::video::Video,
    w: u32,
    h: u32,
    dest: &Path,
) -> Result<()> {
    use std::io::BufWriter;

    let file = std::fs::File::create(dest)?;
    let writer = &mut BufWriter::new(file);
    let mut encoder = png::Encoder::new(writer, w, h);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    let mut png_writer = encoder.write_header()?;
    png_writer.write_image_data(&destripe(frame, w, h, 3))?;
    eprintln!("[poster] saved → {}", dest.display());
    Ok(())
}
