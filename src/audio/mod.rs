//! Audio activity detector (spec.md §2 C2, §4.2): FFT-based ping
//! recognition over a continuous ultrasonic microphone capture stream, with
//! a rolling `WaveWriter` bound to the supervisor's recording state.

mod buffer_pool;
mod fft;
mod ping;
mod unit;
mod wave_writer;

pub use unit::AudioUnit;
