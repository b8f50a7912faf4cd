/// Returns the number of concurrent tasks to use for a given number of items.
/// Can be overridden by setting the environment variable MEDIAGROVE_NUM_THREADS.
/// Defaults to the number of CPUs, capped by how many items there are.
pub fn num_tasks_for_items(num_items: usize) -> usize {
    if let Ok(num_threads) = std::env::var("MEDIAGROVE_NUM_THREADS") {
        if let Ok(num_threads) = num_threads.parse::<usize>() {
            return num_threads.max(1);
        }
    }

    let num_workers = num_cpus::get();

    if num_workers > num_items {
        num_items.max(1)
    } else {
        num_workers
    }
}
