use tagalloc::{Heap, HeapConfig};

fn main() {
    let mut heap = Heap::with_config(HeapConfig::new().with_chunk_size(1024));

    let sizes = [1, 100, 1024, 4096];
    let mut addresses = Vec::new();
    for size in sizes {
        let address = heap.allocate(size).unwrap();
        println!("Requested {size} bytes, received {address:?}");
        addresses.push(address);
    }

    println!("\n{}", heap.dump());

    println!("Releasing the second block, then asking for 50 bytes...");
    unsafe { heap.release(addresses[1]) };
    let reused = heap.allocate(50).unwrap();
    println!("Received {reused:?}, same place as before: {}", reused == addresses[1]);

    println!("\nGrowing the first block to 200 bytes...");
    let grown = unsafe { heap.resize(addresses[0], 200) }.unwrap();
    println!("First block moved from {:?} to {grown:?}", addresses[0]);

    println!("\nReleasing everything...");
    unsafe {
        heap.release(grown);
        heap.release(reused);
        heap.release(addresses[2]);
        heap.release(addresses[3]);
    }

    println!("\n{}", heap.dump());
    match heap.check() {
        Ok(stats) => println!("{stats:#?}"),
        Err(err) => println!("Heap is corrupted: {err}"),
    }
}
