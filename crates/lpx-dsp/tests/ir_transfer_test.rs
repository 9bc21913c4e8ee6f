//! IR Transfer Integration Tests
//!
//! Control thread stages IRs, audio thread picks them up with try-locks.

use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use lpx_dsp::{ConvolutionEngine, IrTransfer, RealFftEngine};

type Engine = ConvolutionEngine<RealFftEngine>;
type Transfer = IrTransfer<RealFftEngine>;

const SAMPLE_RATE: f32 = 48000.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn generate_sine(samples: usize, freq: f32) -> Vec<f32> {
    (0..samples)
        .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE).sin())
        .collect()
}

fn delta(len: usize, at: usize) -> Vec<f32> {
    let mut ir = vec![0.0; len];
    ir[at] = 1.0;
    ir
}

#[test]
fn test_smooth_transfer_between_delays() {
    init_logging();

    const IR_SIZE: usize = 1024;
    const BLOCK: usize = 256;

    let input = generate_sine(48000, 25.0);
    let mut engine = Engine::new(IR_SIZE, BLOCK, Some(&delta(IR_SIZE, 512))).unwrap();
    let transfer = Transfer::new(&engine).unwrap();

    let mut output = vec![0.0; input.len()];
    for (i, (src, dst)) in input.chunks(BLOCK).zip(output.chunks_mut(BLOCK)).enumerate() {
        if i == 40 {
            transfer.set_new_ir(&delta(IR_SIZE, 513)).unwrap();
            assert!(transfer
                .try_transfer_to(std::slice::from_mut(&mut engine))
                .unwrap());
        }
        engine.process_samples(src, dst).unwrap();
    }

    // No dropouts or jumps across the swap
    let max_step = output
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0f32, f32::max);
    assert!(max_step < 0.5, "max sample step {max_step}");

    // Settled output is the input delayed by the new IR
    for n in 20000..input.len() {
        assert!((output[n] - input[n - 513]).abs() < 1e-4);
    }
}

#[test]
fn test_try_lock_never_blocks() {
    init_logging();

    let mut engines = vec![Engine::new(2048, 128, None).unwrap()];
    let transfer = Arc::new(Transfer::for_engines(&engines).unwrap());

    let (locked_tx, locked_rx) = mpsc::channel();
    let release = Arc::new(Barrier::new(2));

    let control = {
        let transfer = Arc::clone(&transfer);
        let release = Arc::clone(&release);
        thread::spawn(move || {
            let _guard = transfer.lock();
            locked_tx.send(()).unwrap();
            release.wait();
        })
    };

    locked_rx.recv().unwrap();

    let start = Instant::now();
    for _ in 0..100 {
        assert!(!transfer.try_transfer_to(&mut engines).unwrap());
    }
    let elapsed = start.elapsed();
    assert!(
        elapsed < Duration::from_millis(50),
        "try-lock attempts took {elapsed:?}"
    );

    release.wait();
    control.join().unwrap();

    assert!(transfer.try_transfer_to(&mut engines).unwrap());
}

#[test]
fn test_transfer_from_control_thread() {
    init_logging();

    const IR_SIZE: usize = 512;
    let new_ir: Vec<f32> = (0..IR_SIZE)
        .map(|i| (-(i as f32) / 50.0).exp() * if i % 2 == 0 { 1.0 } else { -0.5 })
        .collect();

    let mut engines: Vec<Engine> = (0..2)
        .map(|_| Engine::new(IR_SIZE, 64, Some(&delta(IR_SIZE, 0))).unwrap())
        .collect();
    let transfer = Transfer::for_engines(&engines).unwrap();

    thread::scope(|s| {
        s.spawn(|| transfer.set_new_ir(&new_ir).unwrap());
    });

    assert!(transfer.try_transfer_to(&mut engines).unwrap());

    let mut reference = Engine::new(IR_SIZE, 64, Some(&new_ir)).unwrap();
    let input = generate_sine(1024, 440.0);
    let mut expected = vec![0.0; input.len()];
    reference.process_samples(&input, &mut expected).unwrap();

    for engine in &mut engines {
        let mut output = vec![0.0; input.len()];
        engine.process_samples(&input, &mut output).unwrap();
        assert_eq!(output, expected);
    }
}

#[test]
fn test_audio_thread_retries_until_staged() {
    init_logging();

    const IR_SIZE: usize = 4096;
    let mut engines = vec![Engine::new(IR_SIZE, 256, None).unwrap()];
    let transfer = Arc::new(Transfer::for_engines(&engines).unwrap());

    let control = {
        let transfer = Arc::clone(&transfer);
        thread::spawn(move || {
            for step in 0..20 {
                transfer.set_new_ir(&delta(IR_SIZE, step)).unwrap();
            }
        })
    };

    // Audio loop keeps running while the control thread restages
    let mut block = vec![0.0; 256];
    let deadline = Instant::now() + Duration::from_secs(5);
    while !control.is_finished() && Instant::now() < deadline {
        let _ = transfer.try_transfer_to(&mut engines).unwrap();
        engines[0].process_samples_in_place(&mut block);
    }
    control.join().unwrap();

    assert!(transfer.try_transfer_to(&mut engines).unwrap());

    // Final staged IR is a delta at 19
    let mut input = vec![0.0; 256];
    input[0] = 1.0;
    engines[0].reset();
    engines[0].process_samples_in_place(&mut input);
    assert!((input[19] - 1.0).abs() < 1e-5);
}
