#![no_main]
use std::sync::Mutex;

use libfuzzer_sys::fuzz_target;
use pagebin_core::Heap;

/// One heap shared across runs: small pages are never unmapped, so reusing
/// the heap keeps the campaign's footprint bounded.
static HEAP: Mutex<Heap> = Mutex::new(Heap::new());

fuzz_target!(|data: &[u8]| {
    // Parse data as a sequence of allocate/release/resize/zeroed operations.
    if data.len() < 4 {
        return;
    }

    let mut heap = HEAP.lock().unwrap();
    let mut live: Vec<(*mut u8, usize)> = Vec::new();

    for chunk in data.chunks(4) {
        if chunk.len() < 4 {
            break;
        }
        let op = chunk[0] % 4;
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize;
        let size = size.clamp(1, 8192);

        match op {
            0 => {
                if let Some(block) = heap.allocate(size) {
                    // SAFETY: freshly issued block of at least `size` bytes.
                    unsafe { block.as_ptr().write_bytes(chunk[3], size) };
                    live.push((block.as_ptr(), size));
                }
            }
            1 => {
                if let Some((ptr, _)) = live.pop() {
                    heap.release(ptr);
                }
            }
            2 => {
                if let Some((ptr, _)) = live.pop() {
                    // SAFETY: `ptr` is live and was issued by this heap.
                    if let Some(block) = unsafe { heap.resize(ptr, size) } {
                        live.push((block.as_ptr(), size));
                    }
                    // On failure the old block stays live, but the slot was
                    // popped; release it to keep the run leak-free.
                    else {
                        heap.release(ptr);
                    }
                }
            }
            _ => {
                if let Some(block) = heap.allocate_zeroed(size, 2) {
                    // SAFETY: the block holds 2 * size zeroed bytes.
                    unsafe {
                        assert_eq!(block.as_ptr().read(), 0);
                        assert_eq!(block.as_ptr().add(2 * size - 1).read(), 0);
                    }
                    live.push((block.as_ptr(), 2 * size));
                }
            }
        }
    }

    // Clean up so the next run starts from an empty live set.
    for (ptr, _) in live {
        heap.release(ptr);
    }
});
