//! Rate conversion from a channel's native step rate to the output rate.
//!
//! Every resampler pulls raw samples through a fetch callback into its own
//! fetch buffer, produces one output block and then drops the input samples
//! it has fully consumed. The kernel variants (sinc, BLEP, BLAMP) keep 16
//! samples of history in front of the read position.

use std::f64::consts::PI;
use std::sync::LazyLock;

use m4a_ir::ResamplerType;

/// Half-width of the interpolation kernels in input samples.
const FILTER_SIZE: usize = 16;
const CUTOFF_FREQ: f32 = 0.85;
const LUT_SIZE: usize = 256;
const INTEGRAL_RESOLUTION: usize = 256;

/// Scale from kernel argument to LUT index.
const LUT_SCALE: f32 = LUT_SIZE as f32 / FILTER_SIZE as f32;

fn sinc_pi(x: f64) -> f64 {
    if x.abs() < 1e-9 {
        1.0
    } else {
        x.sin() / x
    }
}

struct KernelTables {
    sinc: [f32; LUT_SIZE + 2],
    window: [f32; LUT_SIZE + 2],
    si: [f32; LUT_SIZE + 2],
    ti: [f32; LUT_SIZE + 2],
}

impl KernelTables {
    fn build() -> Self {
        let mut sinc = [0.0f32; LUT_SIZE + 2];
        let mut window = [0.0f32; LUT_SIZE + 2];
        for i in 0..=LUT_SIZE {
            sinc[i] = sinc_pi(i as f64 * FILTER_SIZE as f64 * PI / LUT_SIZE as f64) as f32;
            window[i] = (0.5 + 0.5 * (i as f64 * PI / LUT_SIZE as f64).cos()) as f32;
        }

        // Si and its integral Ti, integrated with the trapezoid rule and blended
        // toward their asymptotes at the end of the table.
        let mut si = [0.0f32; LUT_SIZE + 2];
        let mut ti = [0.0f32; LUT_SIZE + 2];
        let step_per_index = FILTER_SIZE as f64 / LUT_SIZE as f64;
        let integration_inc = step_per_index / INTEGRAL_RESOLUTION as f64;
        let mut acc = 0.0f64;
        let mut index = 0.0f64;
        let mut prev_value = 1.0f64;
        for i in 0..=LUT_SIZE {
            let convergence = 0.5 - 0.5 * (i as f64 * PI / LUT_SIZE as f64).cos();
            si[i] = (acc * (1.0 - convergence) + 0.5 * convergence) as f32;

            let t = i as f64 * step_per_index;
            let function_value = t * acc + (PI * t).cos() / (PI * PI);
            ti[i] = (function_value + convergence * (t * 0.5 - function_value)) as f32;

            for _ in 0..INTEGRAL_RESOLUTION {
                index += integration_inc;
                let new_value = sinc_pi(PI * index);
                acc += (new_value + prev_value) * integration_inc * 0.5;
                prev_value = new_value;
            }
        }
        si[LUT_SIZE + 1] = 0.5;
        ti[LUT_SIZE + 1] = ((LUT_SIZE + 1) as f64 * step_per_index * 0.5) as f32;

        Self { sinc, window, si, ti }
    }
}

static TABLES: LazyLock<KernelTables> = LazyLock::new(KernelTables::build);

fn lut_lerp(lut: &[f32; LUT_SIZE + 2], t: f32) -> f32 {
    let t = t.abs().min(FILTER_SIZE as f32) * LUT_SCALE;
    let left = t as usize;
    let fraction = t - left as f32;
    lut[left] + fraction * (lut[left + 1] - lut[left])
}

fn fast_sinc(t: f32) -> f32 {
    lut_lerp(&TABLES.sinc, t)
}

fn window(t: f32) -> f32 {
    lut_lerp(&TABLES.window, t)
}

/// Sine integral normalized to 0.5 at infinity.
fn fast_si(t: f32) -> f32 {
    lut_lerp(&TABLES.si, t).copysign(t)
}

/// Integral of [`fast_si`]; even, tends to `|t| / 2`.
fn fast_ti(t: f32) -> f32 {
    let t = t.abs();
    if t > FILTER_SIZE as f32 {
        t * 0.5
    } else {
        lut_lerp(&TABLES.ti, t)
    }
}

/// A resampler instance owned by one channel.
#[derive(Clone, Debug)]
pub struct Resampler {
    kind: ResamplerType,
    fetch_buffer: Vec<f32>,
    phase: f32,
}

impl Resampler {
    pub fn new(kind: ResamplerType) -> Self {
        let mut rs = Self { kind, fetch_buffer: Vec::new(), phase: 0.0 };
        rs.reset();
        rs
    }

    pub fn kind(&self) -> ResamplerType {
        self.kind
    }

    pub fn reset(&mut self) {
        self.fetch_buffer.clear();
        if self.uses_kernel() {
            self.fetch_buffer.resize(FILTER_SIZE, 0.0);
        }
        self.phase = 0.0;
    }

    fn uses_kernel(&self) -> bool {
        matches!(self.kind, ResamplerType::Sinc | ResamplerType::Blep | ResamplerType::Blamp)
    }

    /// Fill `out` with samples stepping the input by `phase_inc` per output
    /// sample.
    ///
    /// `fetch` appends raw samples to the buffer until it holds the requested
    /// count and returns `false` once the source is exhausted; that flag is
    /// passed through.
    pub fn process<F>(&mut self, out: &mut [f32], phase_inc: f32, mut fetch: F) -> bool
    where
        F: FnMut(&mut Vec<f32>, usize) -> bool,
    {
        if out.is_empty() {
            return true;
        }
        let phase_inc = phase_inc.max(0.0);

        let mut required = (self.phase + phase_inc * out.len() as f32) as usize + 1;
        required += match self.kind {
            ResamplerType::Nearest => 0,
            ResamplerType::Linear => 1,
            _ => FILTER_SIZE * 2,
        };
        let keep_going = fetch(&mut self.fetch_buffer, required);
        if self.fetch_buffer.len() < required {
            self.fetch_buffer.resize(required, 0.0);
        }

        let consumed = match self.kind {
            ResamplerType::Nearest => self.run_nearest(out, phase_inc),
            ResamplerType::Linear => self.run_linear(out, phase_inc),
            ResamplerType::Sinc => self.run_sinc(out, phase_inc),
            ResamplerType::Blep => self.run_blep(out, phase_inc),
            ResamplerType::Blamp => self.run_blamp(out, phase_inc),
        };

        let consumed = consumed.min(self.fetch_buffer.len());
        self.fetch_buffer.drain(..consumed);
        keep_going
    }

    /// Advance the phase by one output sample, returning the integer step.
    #[inline]
    fn advance(&mut self, phase_inc: f32) -> usize {
        self.phase += phase_inc;
        let istep = self.phase as usize;
        self.phase -= istep as f32;
        istep
    }

    fn run_nearest(&mut self, out: &mut [f32], phase_inc: f32) -> usize {
        let mut fi = 0;
        for sample in out.iter_mut() {
            *sample = self.fetch_buffer[fi];
            fi += self.advance(phase_inc);
        }
        fi
    }

    fn run_linear(&mut self, out: &mut [f32], phase_inc: f32) -> usize {
        let mut fi = 0;
        for sample in out.iter_mut() {
            let a = self.fetch_buffer[fi];
            let b = self.fetch_buffer[fi + 1];
            *sample = a + self.phase * (b - a);
            fi += self.advance(phase_inc);
        }
        fi
    }

    fn run_sinc(&mut self, out: &mut [f32], phase_inc: f32) -> usize {
        let sinc_step = if phase_inc > CUTOFF_FREQ { CUTOFF_FREQ / phase_inc } else { 1.0 };
        let mut fi = 0;
        for sample in out.iter_mut() {
            let mut sample_sum = 0.0;
            let mut kernel_sum = 0.0;
            for (k, input) in self.fetch_buffer[fi..fi + FILTER_SIZE * 2].iter().enumerate() {
                let x = (k as f32 - (FILTER_SIZE as f32 - 1.0)) - self.phase;
                let kernel = fast_sinc(x * sinc_step) * window(x);
                sample_sum += kernel * input;
                kernel_sum += kernel;
            }
            *sample = sample_sum / kernel_sum;
            fi += self.advance(phase_inc);
        }
        fi
    }

    fn run_blep(&mut self, out: &mut [f32], phase_inc: f32) -> usize {
        let sinc_step = CUTOFF_FREQ / phase_inc.max(f32::MIN_POSITIVE);
        let mut fi = 0;
        for sample in out.iter_mut() {
            let mut sample_sum = 0.0;
            let mut kernel_sum = 0.0;
            let first = -(FILTER_SIZE as f32 - 1.0) - self.phase;
            let mut sl = fast_si((first - 0.5) * sinc_step);
            for (k, input) in self.fetch_buffer[fi..fi + FILTER_SIZE * 2].iter().enumerate() {
                let sr = fast_si((first + k as f32 + 0.5) * sinc_step);
                let kernel = sr - sl;
                sample_sum += kernel * input;
                kernel_sum += kernel;
                sl = sr;
            }
            *sample = sample_sum / kernel_sum;
            fi += self.advance(phase_inc);
        }
        fi
    }

    fn run_blamp(&mut self, out: &mut [f32], phase_inc: f32) -> usize {
        let sinc_step = CUTOFF_FREQ / phase_inc.max(f32::MIN_POSITIVE);
        let mut fi = 0;
        for sample in out.iter_mut() {
            let mut sample_sum = 0.0;
            let mut kernel_sum = 0.0;
            let first = -(FILTER_SIZE as f32 - 1.0) - self.phase;
            let mut sl = fast_ti((first - 1.0) * sinc_step);
            let mut sm = fast_ti(first * sinc_step);
            for (k, input) in self.fetch_buffer[fi..fi + FILTER_SIZE * 2].iter().enumerate() {
                let sr = fast_ti((first + k as f32 + 1.0) * sinc_step);
                let kernel = sr - 2.0 * sm + sl;
                sample_sum += kernel * input;
                kernel_sum += kernel;
                sl = sm;
                sm = sr;
            }
            *sample = sample_sum / kernel_sum;
            fi += self.advance(phase_inc);
        }
        fi
    }
}
