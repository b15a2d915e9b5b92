/// Listener tasks started by [`SyncEngine::start_realtime_sync`]. Dropping the
/// handle stops them.
pub struct RealtimeHandle {
    tasks: Vec<(EntityKind, JoinHandle<()>)>,
}

impl RealtimeHandle {
    pub fn kinds(&self) -> Vec<EntityKind> {
        self.tasks.iter().map(|(kind, _)| *kind).collect()
    }

    /// Resolves once any listener has exited and hands back its kind. A listener
    /// only exits when its change feed ends for good, so the caller should
    /// treat this as fatal. Never resolves for a handle without listeners.
    pub async fn closed(&mut self) -> EntityKind {
        if self.tasks.is_empty() {
            return std::future::pending().await;
        }
        let (_, index, _) = select_all(self.tasks.iter_mut().map(|(_, task)| task)).await;
        let (kind, _) = self.tasks.swap_remove(index);
        kind
    }

    pub fn shutdown(mut self) {
        for (kind, task) in self.tasks.drain(..) {
            task.abort();
            debug!(%kind, "listener stopped");
        }
    }
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        for (_, task) in &self.tasks {
            task.abort();
        }
    }
}

impl<F, S> SyncEngine<F, S>
where
    F: RemoteFeed,
    S: FleetStore,
{
    /// Subscribes to every kind and keeps the store in step with remote
    /// changes until the returned handle is shut down or dropped. Only one
    /// set of listeners may run per engine.
    pub async fn start_realtime_sync(self: &Arc<Self>) -> Result<RealtimeHandle, EngineError> {
        if self.realtime_started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }
        let started = self.subscribe_all().await;
        if started.is_err() {
            self.realtime_started.store(false, Ordering::SeqCst);
        }
        started
    }

    async fn subscribe_all(self: &Arc<Self>) -> Result<RealtimeHandle, EngineError> {
        let mut handle = RealtimeHandle {
            tasks: Vec::with_capacity(EntityKind::ALL.len()),
        };
        handle.tasks.push(self.listen(&self.configs.tickets).await?);
        handle.tasks.push(self.listen(&self.configs.expenses).await?);
        handle.tasks.push(self.listen(&self.configs.mileage).await?);
        handle.tasks.push(self.listen(&self.configs.trucks).await?);
        handle.tasks.push(self.listen(&self.configs.users).await?);
        Ok(handle)
    }

    async fn listen<R>(
        self: &Arc<Self>,
        config: &EntitySyncConfig<R>,
    ) -> Result<(EntityKind, JoinHandle<()>), EngineError>
    where
        R: SyncRow,
        S: RecordStore<R>,
    {
        let kind = config.kind;
        let mut subscription =
            self.feed
                .subscribe(&config.path)
                .await
                .map_err(|source| EngineError::Subscribe { kind, source })?;
        info!(%kind, path = %config.path, "listening for remote changes");

        let engine = Arc::clone(self);
        let config = config.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                engine.apply_event(&config, event).await;
            }
            error!(%kind, "change feed closed; listener exiting");
        });
        Ok((kind, task))
    }

    async fn apply_event<R>(&self, config: &EntitySyncConfig<R>, event: FeedEvent)
    where
        R: SyncRow,
        S: RecordStore<R>,
    {
        match event {
            FeedEvent::ChildAdded { key, value } | FeedEvent::ChildChanged { key, value } => {
                let leaves = bucket_items(config.kind, &key, value);
                debug!(kind = %config.kind, key = %key, items = leaves.len(), "remote change");
                join_all(
                    leaves.into_iter().map(|(id, item)| async move {
                        self.reconcile_item(config, &id, item).await
                    }),
                )
                .await;
            }
            FeedEvent::ChildRemoved { key, value } => {
                for (id, item) in bucket_items(config.kind, &key, value) {
                    self.remove_item(config, &id, item).await;
                }
            }
        }
    }
}
