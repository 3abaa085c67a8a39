use libloading::Library;

#[test]
#[cfg_attr(miri, ignore)]
fn exports_the_negotiate_entry_point() {
    let path = test_cdylib::build_current_project();
    let lib = unsafe { Library::new(path) }.unwrap();
    let symbol: libloading::Symbol<unsafe extern "system" fn()> =
        unsafe { lib.get(b"xrNegotiateLoaderApiLayerInterface") }.unwrap();
    drop(symbol);
}
