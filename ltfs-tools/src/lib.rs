pub mod process_locker;
