//! View models for the two paginated surfaces: the subreddit search box and a
//! subreddit's post feed. Rendering and routing belong to the embedding front
//! end; these types own the input timing, the pagination controllers and the
//! viewport triggers, and say what should be shown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, warn};

use crate::canonical::{CanonicalPost, CanonicalSubreddit};
use crate::data::PageSource;
use crate::debounce::DebounceGate;
use crate::pagination::{PaginationController, PaginationState};
use crate::reddit::normalize_subreddit_name;
use crate::storage::{FavoriteSubreddit, Favorites, FavoritesStore};
use crate::viewport::{Threshold, ViewportTrigger};

/// Route changes requested by a view.
pub trait Navigator {
    fn navigate(&mut self, path: &str);
}

pub struct SearchBox {
    query: String,
    open: bool,
    gate: DebounceGate<String>,
    results: PaginationController<CanonicalSubreddit>,
    trigger: ViewportTrigger,
}

impl SearchBox {
    pub fn new(source: Arc<dyn PageSource<Item = CanonicalSubreddit>>, debounce: Duration) -> Self {
        Self {
            query: String::new(),
            open: false,
            gate: DebounceGate::new(debounce),
            results: PaginationController::new(source),
            trigger: ViewportTrigger::new(Threshold::SEARCH),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn results(&self) -> &[CanonicalSubreddit] {
        self.results.state().items()
    }

    pub fn state(&self) -> &PaginationState<CanonicalSubreddit> {
        self.results.state()
    }

    pub fn trigger(&self) -> &ViewportTrigger {
        &self.trigger
    }

    /// Records a keystroke. The search itself waits for the input to settle.
    pub fn input(&mut self, text: &str, now: Instant) {
        self.query = text.to_string();
        if !self.open {
            self.trigger.attach();
        }
        self.open = true;
        self.gate.push(text.to_string(), now);
    }

    /// When `tick` next has work to do, if the input has not settled yet.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.gate.deadline()
    }

    /// Fires a settled query and applies any finished fetches.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;
        if let Some(query) = self.gate.poll(now) {
            self.settle(&query);
            changed = true;
        }
        if self.results.poll() {
            changed = true;
        }
        self.trigger.bind(self.results.sentinel());
        changed
    }

    /// Waits for the in-flight search to land.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let changed = self.results.wait(timeout);
        self.trigger.bind(self.results.sentinel());
        changed
    }

    fn settle(&mut self, query: &str) {
        let query = query.trim();
        if query.is_empty() {
            self.results.clear();
            self.open = false;
        } else {
            debug!(query, "search settled");
            self.results.reset(query);
        }
    }

    pub fn on_sentinel_visible(&mut self, sentinel: &str, ratio: f32) -> bool {
        self.trigger.check(&mut self.results, sentinel, ratio)
    }

    /// Navigates to the chosen subreddit and resets the box.
    pub fn select(&mut self, index: usize, navigator: &mut dyn Navigator) -> bool {
        let Some(subreddit) = self.results.state().items().get(index) else {
            return false;
        };
        let route = subreddit.route_name();
        if route.is_empty() {
            warn!(index, "search result has neither name nor id");
            return false;
        }
        navigator.navigate(&format!("/subreddit/{}", route));
        self.query.clear();
        self.open = false;
        self.gate.cancel();
        self.results.clear();
        self.trigger.bind(None);
        true
    }

    pub fn toggle_favorite<S: FavoritesStore>(
        &self,
        index: usize,
        favorites: &Favorites<S>,
    ) -> Result<Option<bool>> {
        match self.results.state().items().get(index) {
            Some(subreddit) => favorites.toggle(FavoriteSubreddit::from(subreddit)).map(Some),
            None => Ok(None),
        }
    }

    /// Message line under the results, if any.
    pub fn status_line(&self) -> Option<String> {
        if !self.open || self.query.trim().is_empty() {
            return None;
        }
        let state = self.results.state();
        if state.is_empty() && (state.is_loading() || self.gate.is_pending()) {
            return Some("Searching...".into());
        }
        if state.is_loading() {
            return None;
        }
        if let Some(err) = state.error() {
            return Some(err.user_message());
        }
        if state.is_empty() {
            return Some("No subreddits found".into());
        }
        if !state.has_more() {
            return Some("No more results".into());
        }
        None
    }

    /// Hides the results. Typing again reopens the box with its trigger
    /// reconnected.
    pub fn close(&mut self) {
        self.gate.cancel();
        self.trigger.detach();
        self.open = false;
    }
}

impl Drop for SearchBox {
    fn drop(&mut self) {
        self.trigger.detach();
    }
}

pub struct FeedView {
    subreddit: String,
    posts: PaginationController<CanonicalPost>,
    trigger: ViewportTrigger,
}

impl FeedView {
    pub fn new(source: Arc<dyn PageSource<Item = CanonicalPost>>) -> Self {
        Self {
            subreddit: String::new(),
            posts: PaginationController::new(source),
            trigger: ViewportTrigger::new(Threshold::FEED),
        }
    }

    pub fn subreddit(&self) -> &str {
        &self.subreddit
    }

    pub fn posts(&self) -> &[CanonicalPost] {
        self.posts.state().items()
    }

    pub fn state(&self) -> &PaginationState<CanonicalPost> {
        self.posts.state()
    }

    pub fn trigger(&self) -> &ViewportTrigger {
        &self.trigger
    }

    pub fn open(&mut self, subreddit: &str) {
        let name = normalize_subreddit_name(subreddit).to_string();
        self.posts.reset(&name);
        self.subreddit = name;
        self.trigger.attach();
        self.trigger.bind(self.posts.sentinel());
    }

    pub fn poll(&mut self) -> bool {
        let changed = self.posts.poll();
        self.trigger.bind(self.posts.sentinel());
        changed
    }

    pub fn wait(&mut self, timeout: Duration) -> bool {
        let changed = self.posts.wait(timeout);
        self.trigger.bind(self.posts.sentinel());
        changed
    }

    pub fn on_sentinel_visible(&mut self, sentinel: &str, ratio: f32) -> bool {
        self.trigger.check(&mut self.posts, sentinel, ratio)
    }

    /// Asks for the next page without a viewport sample, as a "load more"
    /// button would.
    pub fn load_more(&mut self) -> bool {
        self.posts.load_more()
    }

    pub fn select(&self, index: usize, navigator: &mut dyn Navigator) -> bool {
        let Some(post) = self.posts.state().items().get(index) else {
            return false;
        };
        let subreddit = if post.subreddit.is_empty() {
            self.subreddit.as_str()
        } else {
            post.subreddit.as_str()
        };
        navigator.navigate(&format!("/subreddit/{}/post/{}", subreddit, post.id));
        true
    }

    /// Stars or unstars the open subreddit; returns whether it is a favorite
    /// afterwards.
    pub fn toggle_favorite<S: FavoritesStore>(&self, favorites: &Favorites<S>) -> Result<bool> {
        favorites.toggle(FavoriteSubreddit {
            id: self.subreddit.to_lowercase(),
            name: self.subreddit.clone(),
            subscribers: None,
            description: None,
        })
    }

    pub fn status_line(&self) -> Option<String> {
        let state = self.posts.state();
        if let Some(err) = state.error() {
            return Some(err.user_message());
        }
        if state.is_loading() {
            return Some(if state.is_empty() {
                "Loading...".into()
            } else {
                "Loading more...".into()
            });
        }
        if state.is_empty() {
            return state.target().map(|_| "No posts found".to_string());
        }
        if !state.has_more() {
            return Some("No more posts to load".into());
        }
        None
    }

    pub fn close(&mut self) {
        self.trigger.detach();
    }
}

impl Drop for FeedView {
    fn drop(&mut self) {
        self.trigger.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Page;
    use crate::error::GatewayError;
    use crate::storage::MemoryFavorites;
    use parking_lot::Mutex;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl Navigator for Recorder {
        fn navigate(&mut self, path: &str) {
            self.0.push(path.to_string());
        }
    }

    #[derive(Default)]
    struct Directory {
        queries: Mutex<Vec<(String, Option<String>)>>,
    }

    impl PageSource for Directory {
        type Item = CanonicalSubreddit;

        fn fetch_page(
            &self,
            target: &str,
            cursor: Option<&str>,
        ) -> Result<Page<CanonicalSubreddit>, GatewayError> {
            self.queries
                .lock()
                .push((target.to_string(), cursor.map(str::to_string)));
            if target == "broken" {
                return Err(GatewayError::Upstream {
                    status: 500,
                    body: "Failed to search subreddits".into(),
                });
            }
            let sub = |name: &str| CanonicalSubreddit {
                id: format!("t5_{}", name),
                name: name.to_string(),
                ..CanonicalSubreddit::default()
            };
            Ok(match cursor {
                None => Page {
                    items: vec![sub(target), sub(&format!("{}2", target))],
                    after: Some("t5_next".into()),
                    before: None,
                },
                Some(_) => Page {
                    items: vec![sub(&format!("{}3", target))],
                    after: None,
                    before: None,
                },
            })
        }
    }

    struct Posts;

    impl PageSource for Posts {
        type Item = CanonicalPost;

        fn fetch_page(&self, target: &str, _cursor: Option<&str>) -> Result<Page<CanonicalPost>, GatewayError> {
            Ok(Page {
                items: vec![CanonicalPost {
                    id: "p1".into(),
                    subreddit: target.to_string(),
                    ..CanonicalPost::default()
                }],
                after: None,
                before: None,
            })
        }
    }

    fn search_box(source: &Arc<Directory>) -> SearchBox {
        SearchBox::new(source.clone(), Duration::from_millis(300))
    }

    #[test]
    fn typing_burst_issues_one_search_for_last_value() {
        let source = Arc::new(Directory::default());
        let mut search = search_box(&source);
        let start = Instant::now();

        search.input("c", start);
        search.input("ca", start + Duration::from_millis(100));
        search.input("cat", start + Duration::from_millis(200));
        assert_eq!(search.status_line().as_deref(), Some("Searching..."));
        assert!(!search.tick(start + Duration::from_millis(400)));
        assert!(search.tick(start + Duration::from_millis(500)));
        search.wait(WAIT);

        assert_eq!(*source.queries.lock(), vec![("cat".to_string(), None)]);
        assert_eq!(search.results().len(), 2);
        assert_eq!(search.trigger().bound(), Some("t5_cat2"));
    }

    #[test]
    fn sentinel_loads_next_page_then_reports_end() {
        let source = Arc::new(Directory::default());
        let mut search = search_box(&source);
        let start = Instant::now();
        search.input("rust", start);
        search.tick(start + Duration::from_millis(300));
        search.wait(WAIT);

        assert!(!search.on_sentinel_visible("t5_rust2", 0.3));
        assert!(search.on_sentinel_visible("t5_rust2", 0.8));
        search.wait(WAIT);
        assert_eq!(search.results().len(), 3);
        assert_eq!(search.status_line().as_deref(), Some("No more results"));
    }

    #[test]
    fn blank_query_clears_and_hides() {
        let source = Arc::new(Directory::default());
        let mut search = search_box(&source);
        let start = Instant::now();
        search.input("rust", start);
        search.tick(start + Duration::from_millis(300));
        search.wait(WAIT);

        search.input("  ", start + Duration::from_secs(1));
        search.tick(start + Duration::from_secs(2));
        assert!(search.results().is_empty());
        assert!(!search.is_open());
        assert!(search.status_line().is_none());
        assert_eq!(source.queries.lock().len(), 1);
    }

    #[test]
    fn errors_show_in_status_line() {
        let source = Arc::new(Directory::default());
        let mut search = search_box(&source);
        let start = Instant::now();
        search.input("broken", start);
        search.tick(start + Duration::from_millis(300));
        search.wait(WAIT);
        assert_eq!(
            search.status_line().as_deref(),
            Some("upstream error 500: Failed to search subreddits")
        );
    }

    #[test]
    fn select_navigates_and_resets() {
        let source = Arc::new(Directory::default());
        let mut search = search_box(&source);
        let start = Instant::now();
        search.input("valorant", start);
        search.tick(start + Duration::from_millis(300));
        search.wait(WAIT);

        let mut nav = Recorder::default();
        assert!(search.select(0, &mut nav));
        assert_eq!(nav.0, vec!["/subreddit/valorant".to_string()]);
        assert_eq!(search.query(), "");
        assert!(!search.is_open());
        assert!(search.results().is_empty());
        assert!(!search.select(0, &mut nav));
    }

    #[test]
    fn close_detaches_trigger() {
        let source = Arc::new(Directory::default());
        let mut search = search_box(&source);
        search.close();
        assert!(!search.trigger().is_attached());
    }

    #[test]
    fn reopened_box_keeps_scroll_continuation() {
        let source = Arc::new(Directory::default());
        let mut search = search_box(&source);
        let start = Instant::now();
        search.input("cat", start);
        search.tick(start + Duration::from_millis(300));
        search.wait(WAIT);
        search.close();
        assert!(!search.on_sentinel_visible("t5_cat2", 1.0));

        let later = start + Duration::from_secs(1);
        search.input("dog", later);
        assert!(search.trigger().is_attached());
        search.tick(later + Duration::from_millis(300));
        search.wait(WAIT);
        assert_eq!(search.trigger().bound(), Some("t5_dog2"));

        assert!(search.on_sentinel_visible("t5_dog2", 1.0));
        search.wait(WAIT);
        assert_eq!(search.results().len(), 3);
        assert_eq!(
            source.queries.lock().last(),
            Some(&("dog".to_string(), Some("t5_next".to_string())))
        );
    }

    #[test]
    fn feed_view_select_and_favorite() {
        let mut feed = FeedView::new(Arc::new(Posts));
        feed.open("r/Gaming");
        assert_eq!(feed.subreddit(), "Gaming");
        feed.wait(WAIT);
        assert_eq!(feed.status_line().as_deref(), Some("No more posts to load"));

        let mut nav = Recorder::default();
        assert!(feed.select(0, &mut nav));
        assert_eq!(nav.0, vec!["/subreddit/Gaming/post/p1".to_string()]);

        let favorites = Favorites::new(MemoryFavorites::new());
        assert!(feed.toggle_favorite(&favorites).unwrap());
        assert_eq!(favorites.list().unwrap()[0].name, "Gaming");
        assert!(!feed.toggle_favorite(&favorites).unwrap());

        feed.close();
        assert!(!feed.trigger().is_attached());
        feed.open("rust");
        assert!(feed.trigger().is_attached());
    }
}
