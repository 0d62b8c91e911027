use super::error::{ErrorCode, RasterError, RasterResult};
use super::parser::Parser;
use rustc_hash::FxHashSet;

/// Deepest `/Pages` nesting the walker will follow.
pub const MAX_PAGE_TREE_DEPTH: usize = 64;

/// Depth-first walk state for one page tree.
struct PageTreeWalker {
    /// Page object offsets found so far
    pages: Vec<u64>,
    /// The root's `/Count`
    expected: usize,
    /// Node offsets already entered
    visited: FxHashSet<u64>,
}

impl PageTreeWalker {
    fn walk_node(&mut self, parser: &mut Parser<'_>, node: u64, depth: usize) -> RasterResult<()> {
        if depth > MAX_PAGE_TREE_DEPTH {
            return Err(RasterError::new(ErrorCode::PageTreeTooDeep, node));
        }
        if !self.visited.insert(node) {
            return Err(RasterError::new(ErrorCode::PageTreeCycle, node));
        }

        let kind = parser.lookup_name(node, b"Type")?;
        match kind.as_deref() {
            Some(b"Page") => {
                if self.pages.len() >= self.expected {
                    return Err(RasterError::new(ErrorCode::TooManyPages, node));
                }
                log::trace!("page {} at offset {}", self.pages.len(), node);
                self.pages.push(node);
                Ok(())
            }
            Some(b"Pages") => self.walk_kids(parser, node, depth),
            _ => Err(RasterError::new(ErrorCode::PagesType, node)),
        }
    }

    fn walk_kids(&mut self, parser: &mut Parser<'_>, node: u64, depth: usize) -> RasterResult<()> {
        let kids = parser
            .dictionary_lookup(node, b"Kids")?
            .ok_or_else(|| RasterError::new(ErrorCode::KidsNotArray, node))?;

        let mut pos = kids;
        if !parser.lexer().expect_token(&mut pos, b"[")? {
            return Err(RasterError::new(ErrorCode::KidsNotArray, kids));
        }

        loop {
            if parser.lexer().expect_token(&mut pos, b"]")? {
                return Ok(());
            }
            let kid = pos;
            let (num, generation) = parser
                .parse_reference(&mut pos)?
                .ok_or_else(|| RasterError::new(ErrorCode::KidNotReference, kid))?;
            let child = parser.resolve_indirect_reference(num, generation, kid)?;
            self.walk_node(parser, child, depth + 1)?;
        }
    }
}

/// Walks the page tree under `root` and returns every page's offset in
/// document order.
///
/// Fails if the tree holds a different number of pages than `expected`,
/// revisits a node, or nests deeper than [`MAX_PAGE_TREE_DEPTH`].
pub fn build_page_table(parser: &mut Parser<'_>, root: u64, expected: usize) -> RasterResult<Vec<u64>> {
    let mut pages = Vec::new();
    pages
        .try_reserve_exact(expected)
        .map_err(|_| RasterError::new(ErrorCode::OutOfMemory, root))?;

    let mut walker = PageTreeWalker {
        pages,
        expected,
        visited: FxHashSet::default(),
    };
    walker.walk_node(parser, root, 0)?;

    if walker.pages.len() != expected {
        return Err(RasterError::new(ErrorCode::PageCountMismatch, root));
    }
    log::debug!("page table built: {} pages", expected);
    Ok(walker.pages)
}
