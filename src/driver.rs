//! Async driver delivering notifications on a tokio runtime.

use crate::runtime::Runtime;

impl Runtime {
    /// Deliver notifications as their deadlines pass, forever.
    ///
    /// Sleeps until the earliest deadline and wakes early whenever a new
    /// notification is scheduled. Meant for runtimes on the system clock;
    /// spawn it and abort the task to stop.
    ///
    /// # Example
    ///
    /// ```
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// use std::time::Duration;
    /// use synced_signal::Runtime;
    ///
    /// let runtime = Runtime::builder()
    ///     .default_debounce(Duration::from_millis(5))
    ///     .build()
    ///     .unwrap();
    /// let driver = tokio::spawn({
    ///     let runtime = runtime.clone();
    ///     async move { runtime.drive().await }
    /// });
    ///
    /// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    /// let signal = runtime.signal(0).unwrap();
    /// signal.subscribe(move |value, _, _, _| { let _ = tx.send(*value); }).unwrap();
    /// signal.set(1).unwrap();
    ///
    /// assert_eq!(rx.recv().await, Some(0));
    /// assert_eq!(rx.recv().await, Some(1));
    /// driver.abort();
    /// # }
    /// ```
    pub async fn drive(&self) {
        loop {
            self.run_due();
            // Register interest before reading the deadline so a timer
            // scheduled in between still wakes us.
            let woken = self.wake().notified();
            tokio::pin!(woken);
            woken.as_mut().enable();
            match self.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_sub(self.now());
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = &mut woken => {}
                    }
                }
                None => woken.await,
            }
        }
    }
}
